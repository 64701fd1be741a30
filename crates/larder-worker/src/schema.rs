//! Inventory database layout shared by the worker and anything that seeds it.

use larder_store::{StoreError, VersionTransaction};

pub const DB_NAME: &str = "larder";
pub const DB_VERSION: u32 = 1;

pub const PRODUCTS_STORE: &str = "products";
pub const BATCHES_STORE: &str = "product_batches";

/// Creates whatever object stores the target version needs and the database
/// does not have yet.
pub fn upgrade(tx: &mut VersionTransaction<'_>) -> Result<(), StoreError> {
    if tx.new_version() >= 1 {
        for store in [PRODUCTS_STORE, BATCHES_STORE] {
            if !tx.contains_object_store(store)? {
                tx.create_object_store(store)?;
            }
        }
    }
    Ok(())
}
