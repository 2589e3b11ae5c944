use std::path::Path;
use std::time::Duration;

use futures::channel::mpsc;
use futures::prelude::*;
use notify::RecursiveMode;
use notify::Watcher;

/// Stream an event whenever the file at `path` is modified. An initial event
/// is always emitted so consumers read the file once up front. The stream
/// never terminates and must be dropped to stop watching.
pub(crate) fn watch(path: &Path) -> impl Stream<Item = ()> {
    let (mut watch_sender, watch_receiver) = mpsc::channel(1);
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                // Only modifications matter here. A full channel means a
                // notification is already pending, but dropping the event
                // could lose the final write, so retry until it fits.
                if let notify::event::EventKind::Modify(_) = event.kind {
                    loop {
                        match watch_sender.try_send(()) {
                            Ok(_) => break,
                            Err(err) => {
                                tracing::warn!(
                                    "could not process file watch notification. {}",
                                    err.to_string()
                                );
                                if err.is_full() {
                                    std::thread::sleep(Duration::from_millis(50));
                                } else {
                                    panic!("event channel failed: {}", err);
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => tracing::error!("file watch error: {:?}", err),
        })
        .unwrap_or_else(|_| panic!("could not create watch on: {:?}", path));
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .unwrap_or_else(|_| panic!("could not watch: {:?}", path));

    stream::once(future::ready(()))
        .chain(watch_receiver)
        .chain(stream::once(async move {
            // the stream needs to own the watcher, otherwise it is dropped
            // right away and no events ever arrive. This future never runs.
            drop(watcher);
        }))
        .boxed()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::env::temp_dir;
    use std::fs::File;
    use std::io::Seek;
    use std::io::SeekFrom;
    use std::io::Write;
    use std::path::PathBuf;

    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn modifications_are_streamed() {
        let (path, mut file) = create_temp_file();
        let mut watch = watch(&path);
        // filesystem notification timing is racy, write_and_flush sleeps
        // long enough for the event to arrive before polling
        assert!(futures::poll!(watch.next()).is_ready());
        write_and_flush(&mut file, "listen: 127.0.0.1:4000").await;
        assert!(futures::poll!(watch.next()).is_ready());
        write_and_flush(&mut file, "listen: 127.0.0.1:4001").await;
        assert!(futures::poll!(watch.next()).is_ready())
    }

    pub(crate) fn create_temp_file() -> (PathBuf, File) {
        let path = temp_dir().join(format!("{}", uuid::Uuid::new_v4()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }

    pub(crate) async fn write_and_flush(file: &mut File, contents: &str) {
        file.seek(SeekFrom::Start(0)).unwrap();
        file.set_len(0).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
