use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use bytes::{Buf, BufMut, BytesMut};
use crc::Crc;
#[cfg(test)] use mockall::automock;
use tracing::{debug, info};

use crate::dispatch::collection::TicketCollection;
use crate::model::ticket::Ticket;


#[cfg_attr(test, automock)]
pub trait Persistence: Send + Sync + 'static {
    fn save(&self) -> anyhow::Result<()>;
}

const SNAPSHOT_VERSION: u8 = 1;

fn checksum(data: &[u8]) -> u64 {
    Crc::<u64>::new(&crc::CRC_64_REDIS).checksum(data)
}

/// Persists the collection as a single binary file: a version byte, the tickets in wire format
///  and a CRC-64 over both.
pub struct FileSnapshot {
    path: PathBuf,
    collection: Arc<TicketCollection>,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>, collection: Arc<TicketCollection>) -> FileSnapshot {
        FileSnapshot {
            path: path.into(),
            collection,
        }
    }

    /// Reads the tickets stored at `path`. A missing file is an empty collection.
    pub fn load(path: &Path) -> anyhow::Result<Vec<Ticket>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no snapshot at {:?}, starting with an empty collection", path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading snapshot {:?}", path)),
        };

        if raw.len() < 1 + size_of::<u64>() {
            bail!("snapshot {:?} is truncated", path);
        }
        let (content, mut trailer) = raw.split_at(raw.len() - size_of::<u64>());
        if trailer.get_u64() != checksum(content) {
            bail!("snapshot {:?} is corrupt: checksum mismatch", path);
        }

        let mut buf = content;
        let version = buf.get_u8();
        if version != SNAPSHOT_VERSION {
            bail!("snapshot {:?} has unsupported version {}", path, version);
        }
        let tickets = Ticket::try_deser_list(&mut buf)
            .map_err(|e| anyhow!("snapshot {:?} is malformed: {}", path, e))?;
        debug!("loaded {} tickets from {:?}", tickets.len(), path);
        Ok(tickets)
    }
}

impl Persistence for FileSnapshot {
    fn save(&self) -> anyhow::Result<()> {
        let tickets = self.collection.snapshot();

        let mut buf = BytesMut::new();
        buf.put_u8(SNAPSHOT_VERSION);
        Ticket::ser_list(&tickets, &mut buf);
        let crc = checksum(&buf);
        buf.put_u64(crc);

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &buf)
            .with_context(|| format!("writing snapshot {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing snapshot {:?}", self.path))?;

        info!("saved {} tickets to {:?}", tickets.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::model::ticket::tests::sample_ticket;
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("ticketnet-{}.bin", Uuid::new_v4()))
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let collection = Arc::new(TicketCollection::default());
        collection.add(sample_ticket(0, None), "alice");
        collection.add(sample_ticket(0, None), "bob");

        FileSnapshot::new(&path, collection.clone()).save().unwrap();
        let loaded = FileSnapshot::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, collection.snapshot());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(FileSnapshot::load(&temp_path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let path = temp_path();
        let collection = Arc::new(TicketCollection::default());
        collection.add(sample_ticket(0, None), "alice");
        FileSnapshot::new(&path, collection).save().unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[3] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let result = FileSnapshot::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
