//! In-memory data tables for the recommender.
//!
//! Two read-only indexes are built once at startup:
//! - `InteractionCatalog`: user id -> set of item ids the user has played
//! - `ItemCatalog`: item id -> display metadata, in table order
//!
//! Both load from CSV. Any malformed row fails the whole load with
//! `RecommendError::ArtifactLoad`.

use gamerec_model::{CatalogEntry, InteractionRecord, ItemId, Price, RecommendError, Result, UserId};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

static NO_INTERACTIONS: BTreeSet<ItemId> = BTreeSet::new();

/// Index of historical (user, item) interactions.
#[derive(Debug, Clone, Default)]
pub struct InteractionCatalog {
    by_user: HashMap<UserId, BTreeSet<ItemId>>,
    items: BTreeSet<ItemId>,
}

impl InteractionCatalog {
    /// Build the index from records. Duplicate pairs collapse.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = InteractionRecord>,
    {
        let mut catalog = Self::default();
        for record in records {
            catalog.items.insert(record.item_id);
            catalog
                .by_user
                .entry(record.user_id)
                .or_default()
                .insert(record.item_id);
        }
        catalog
    }

    /// Load from a CSV file with columns `user_id,item_id[,strength]`.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path).map_err(|e| RecommendError::artifact(path.display(), e))?;
        let catalog = Self::from_csv(reader, &path.display().to_string())?;
        tracing::info!(
            path = %path.display(),
            users = catalog.user_count(),
            pairs = catalog.len(),
            "Loaded interaction table"
        );
        Ok(catalog)
    }

    /// Load from any CSV source; `source` names it in errors.
    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        Self::from_csv(csv::Reader::from_reader(reader), source)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, source: &str) -> Result<Self> {
        let mut records = Vec::new();
        for row in reader.deserialize::<InteractionRecord>() {
            let record = row.map_err(|e| RecommendError::artifact(source, e))?;
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    /// Items the user has interacted with. Unknown users get the empty set.
    pub fn interactions_for(&self, user_id: UserId) -> &BTreeSet<ItemId> {
        self.by_user.get(&user_id).unwrap_or(&NO_INTERACTIONS)
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.by_user.contains_key(&user_id)
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Number of distinct (user, item) pairs.
    pub fn len(&self) -> usize {
        self.by_user.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Every item id seen in the table.
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.iter().copied()
    }
}

/// Raw catalog row; `price` is validated separately so errors name the item.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    item_id: ItemId,
    title: String,
    image_url: String,
    price: String,
}

/// Item metadata keyed by item id, preserving table order.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    order: Vec<ItemId>,
    entries: HashMap<ItemId, CatalogEntry>,
}

impl ItemCatalog {
    /// Build from entries. Duplicate item ids are rejected.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        Self::collect(entries, "item catalog")
    }

    fn collect<I>(entries: I, source: &str) -> Result<Self>
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let mut catalog = Self::default();
        for entry in entries {
            let item_id = entry.item_id;
            if catalog.entries.insert(item_id, entry).is_some() {
                return Err(RecommendError::artifact(source, format!("duplicate item_id {item_id}")));
            }
            catalog.order.push(item_id);
        }
        Ok(catalog)
    }

    /// Load from a CSV file with columns `item_id,title,image_url,price`.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = csv::Reader::from_path(path).map_err(|e| RecommendError::artifact(path.display(), e))?;
        let catalog = Self::from_csv(reader, &path.display().to_string())?;
        tracing::info!(path = %path.display(), items = catalog.len(), "Loaded item catalog");
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        Self::from_csv(csv::Reader::from_reader(reader), source)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, source: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for row in reader.deserialize::<CatalogRow>() {
            let row = row.map_err(|e| RecommendError::artifact(source, e))?;
            let price = Price::parse(&row.price).ok_or_else(|| {
                RecommendError::artifact(source, format!("item {} has invalid price {:?}", row.item_id, row.price))
            })?;
            entries.push(CatalogEntry {
                item_id: row.item_id,
                title: row.title,
                image_url: row.image_url,
                price,
            });
        }
        Self::collect(entries, source)
    }

    pub fn get(&self, item_id: ItemId) -> Option<&CatalogEntry> {
        self.entries.get(&item_id)
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.entries.contains_key(&item_id)
    }

    /// All item ids in table order.
    pub fn item_ids(&self) -> &[ItemId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_interactions_for_known_user() {
        let catalog = InteractionCatalog::from_records(vec![
            InteractionRecord::new(42, 11),
            InteractionRecord::new(42, 10),
            InteractionRecord::new(7, 12),
        ]);
        let items: Vec<_> = catalog.interactions_for(42).iter().copied().collect();
        assert_eq!(items, vec![10, 11]);
        assert_eq!(catalog.user_count(), 2);
        assert_eq!(catalog.item_ids().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn test_unknown_user_is_empty() {
        let catalog = InteractionCatalog::from_records(vec![InteractionRecord::new(1, 2)]);
        assert!(catalog.interactions_for(999).is_empty());
        assert!(!catalog.contains_user(999));
    }

    #[test]
    fn test_duplicate_interactions_collapse() {
        let catalog = InteractionCatalog::from_records(vec![
            InteractionRecord::new(1, 5),
            InteractionRecord::new(1, 5).with_strength(30.0),
        ]);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_interactions_from_csv() {
        let data = "user_id,item_id,strength\n42,10,120.5\n42,11,\n7,10,3\n";
        let catalog = InteractionCatalog::from_reader(data.as_bytes(), "inline").unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(catalog.interactions_for(42).contains(&11));
    }

    #[test]
    fn test_interactions_missing_column() {
        let data = "user_id,game\n42,10\n";
        let err = InteractionCatalog::from_reader(data.as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, RecommendError::ArtifactLoad { .. }));
    }

    #[test]
    fn test_item_catalog_from_csv_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "item_id,title,image_url,price").unwrap();
        writeln!(file, "10180,Call of Duty: Modern Warfare 2 (2009),https://cdn.example/10180.jpg,19.99").unwrap();
        writeln!(file, "751780,Forager,https://cdn.example/751780.jpg,FREE").unwrap();
        file.flush().unwrap();

        let catalog = ItemCatalog::from_csv_path(file.path()).unwrap();
        assert_eq!(catalog.item_ids(), &[10180, 751780]);
        assert_eq!(catalog.get(10180).unwrap().price.to_string(), "19.99");
        assert!(catalog.get(751780).unwrap().price.is_free());
    }

    #[test]
    fn test_item_catalog_rejects_bad_price() {
        let data = "item_id,title,image_url,price\n1,A,http://a,lots\n";
        let err = ItemCatalog::from_reader(data.as_bytes(), "inline").unwrap_err();
        match err {
            RecommendError::ArtifactLoad { reason, .. } => assert!(reason.contains("invalid price")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_item_catalog_rejects_overflowing_price() {
        let data = "item_id,title,image_url,price\n7,A,http://a,1e20\n";
        match ItemCatalog::from_reader(data.as_bytes(), "inline").unwrap_err() {
            RecommendError::ArtifactLoad { reason, .. } => assert!(reason.contains("item 7 has invalid price")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_item_catalog_rejects_duplicates() {
        let data = "item_id,title,image_url,price\n1,A,http://a,1\n1,B,http://b,2\n";
        assert!(ItemCatalog::from_reader(data.as_bytes(), "inline").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ItemCatalog::from_csv_path("/nonexistent/catalog.csv").unwrap_err();
        assert!(matches!(err, RecommendError::ArtifactLoad { .. }));
    }
}
