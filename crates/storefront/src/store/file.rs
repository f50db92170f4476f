//! Local cart slot backed by a JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::instrument;

use tienda_core::CartLineItem;

use super::{LocalCartStore, LocalSlot, StoreError, decode_local_slot, encode_local_slot};

/// A local slot stored as one JSON file.
///
/// Writes go to a sibling temp file that is renamed over the slot, so a
/// crash mid-write leaves the previous cart intact.
#[derive(Debug, Clone)]
pub struct FileCartSlot {
    path: PathBuf,
}

impl FileCartSlot {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalCartStore for FileCartSlot {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<LocalSlot, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(decode_local_slot(Some(&raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocalSlot::Absent),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, items), fields(path = %self.path.display(), lines = items.len()))]
    async fn save(&self, items: &[CartLineItem]) -> Result<(), StoreError> {
        let payload = encode_local_slot(items)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, payload).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use tienda_core::ProductSnapshot;

    use super::*;

    fn line(id: &str, quantity: u32) -> CartLineItem {
        CartLineItem::new(ProductSnapshot::new(id, id, Decimal::new(990, 2), 5), quantity)
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileCartSlot::new(dir.path().join("cart.json"));
        assert_eq!(slot.load().await.unwrap(), LocalSlot::Absent);
        slot.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileCartSlot::new(dir.path().join("nested/state/cart.json"));

        slot.save(&[line("a", 2), line("b", 1)]).await.unwrap();
        assert_eq!(
            slot.load().await.unwrap(),
            LocalSlot::Present(vec![line("a", 2), line("b", 1)])
        );
        assert!(!slot.temp_path().exists());

        slot.clear().await.unwrap();
        assert!(!slot.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.json");
        std::fs::write(&path, "{\"items\": [oops").unwrap();

        let slot = FileCartSlot::new(&path);
        assert!(matches!(slot.load().await.unwrap(), LocalSlot::Corrupt { .. }));
        assert!(path.exists());
    }
}
