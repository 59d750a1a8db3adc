/*!
Glue between [`treechunk_scanner::HoleReader`] and [`LayerTreeWriter`]:
drains a scanned file section by section, turning data sections into
literal writes and hole sections into `write_zeros` calls so the writer
never has to read (or allocate) the zero bytes a hole represents.
*/
use treechunk_scanner::{HoleReader, Section};

use crate::error::Result;
use crate::writer::{ChunkSink, LayerTreeWriter};

/// Bytes read from a data section per `read` call. Matches the block
/// size the scanner itself defaults to when probing section boundaries.
const READ_CHUNK: usize = 1 << 18;

/// Writes the entirety of `reader`'s remaining sections into `writer`.
/// Does not call [`LayerTreeWriter::wrap_up`] -- callers that want to
/// pad to a specific `block_size` and seal the tree do that themselves
/// once every source file (or stream) has been written.
pub fn write_sparse_source<S: ChunkSink>(writer: &mut LayerTreeWriter<S>, reader: &mut HoleReader) -> Result<()> {
    while let Some(section) = reader.next_section()? {
        match section {
            Section::Data(mut data) => loop {
                let buf = data.read(READ_CHUNK)?;
                if buf.is_empty() {
                    break;
                }
                writer.write(&buf)?;
            },
            Section::Hole(mut hole) => {
                let skipped = hole.skip();
                if skipped > 0 {
                    writer.write_zeros(skipped)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::NamedTempFile;
    use treechunk_core::Hash;

    #[derive(Default)]
    struct MemSink {
        chunks: HashMap<Hash, Vec<u8>>,
    }

    impl ChunkSink for MemSink {
        fn persist(&mut self, name: &Hash, bytes: &[u8]) -> std::io::Result<()> {
            self.chunks.insert(*name, bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn writes_a_sparse_file_as_data_and_zero_runs() {
        let mut f = NamedTempFile::new().unwrap();
        let hole = 1 << 20;
        f.as_file().set_len(hole).unwrap();
        f.as_file_mut().seek(SeekFrom::Start(hole)).unwrap();
        f.write_all(b"trailing data").unwrap();
        f.flush().unwrap();

        let mut hole_reader = HoleReader::open(f.path()).unwrap();
        let mut writer = LayerTreeWriter::new(MemSink::default(), 12, b"key material", &[b'U'; 16], true).unwrap();
        write_sparse_source(&mut writer, &mut hole_reader).unwrap();
        let expected_size = hole + "trailing data".len() as u64;
        assert_eq!(writer.total_size(), expected_size);
    }
}
