//! SQL query implementations.
//!
//! Ids are `u64` in the domain and `BIGINT` in the database; conversions
//! happen here and nowhere else.

pub mod orders;
pub mod shops;
pub mod vouchers;

use flashsale_storage::StorageError;

pub(crate) fn to_db_id(entity: &str, id: u64) -> Result<i64, StorageError> {
    i64::try_from(id).map_err(|_| {
        StorageError::invalid_input(format!("{entity} id {id} exceeds BIGINT range"))
    })
}

pub(crate) fn from_db_id(entity: &str, id: i64) -> Result<u64, StorageError> {
    u64::try_from(id).map_err(|_| StorageError::corrupted(format!("negative {entity} id {id}")))
}
