use anyhow::{Context, Result};
use crossbeam::channel::bounded;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Read-ahead batch size for the producer thread.
const CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// Bounded queue depth; caps buffered memory at READ_AHEAD * CHUNK_SIZE.
const READ_AHEAD: usize = 4;

/// Concatenate `sources`, in the given order, into `output`. Returns the
/// total number of bytes written.
///
/// A producer thread streams the source files while the calling thread
/// writes, overlapping input with output. With a single producer feeding a
/// bounded channel, buffers arrive in read order, so the written bytes are
/// exactly the sources back to back.
pub fn concatenate<P: AsRef<Path>>(sources: &[PathBuf], output: P) -> Result<u64> {
    let output = output.as_ref();
    let file =
        File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);

    let (sender, receiver) = bounded::<Vec<u8>>(READ_AHEAD);

    let total = crossbeam::thread::scope(|s| -> Result<u64> {
        let producer = s.spawn(move |_| -> Result<()> {
            for path in sources {
                let mut file =
                    File::open(path).with_context(|| format!("opening {}", path.display()))?;
                loop {
                    let mut buf = vec![0u8; CHUNK_SIZE];
                    let n = file
                        .read(&mut buf)
                        .with_context(|| format!("reading {}", path.display()))?;
                    if n == 0 {
                        break;
                    }
                    buf.truncate(n);
                    if sender.send(buf).is_err() {
                        return Ok(()); // consumer hung up
                    }
                }
            }
            Ok(())
        });

        let mut total = 0u64;
        while let Ok(buf) = receiver.recv() {
            writer
                .write_all(&buf)
                .with_context(|| format!("writing {}", output.display()))?;
            total += buf.len() as u64;
        }

        producer.join().unwrap()?;
        Ok(total)
    })
    .unwrap()?;

    writer.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_concatenation_preserves_order_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pieces: Vec<(PathBuf, Vec<u8>)> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("part-{i}"));
                let data = vec![i as u8 + 1; 1000 * (i + 1)];
                fs::write(&path, &data).unwrap();
                (path, data)
            })
            .collect();

        let out = dir.path().join("merged");
        let sources: Vec<PathBuf> = pieces.iter().map(|(p, _)| p.clone()).collect();
        let written = concatenate(&sources, &out).unwrap();

        let expected: Vec<u8> = pieces.into_iter().flat_map(|(_, d)| d).collect();
        assert_eq!(written, expected.len() as u64);
        assert_eq!(fs::read(&out).unwrap(), expected);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![dir.path().join("absent")];
        assert!(concatenate(&sources, dir.path().join("merged")).is_err());
    }
}
