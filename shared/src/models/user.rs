//! User Address Model
//!
//! Users themselves are referenced by id only; the core never needs more
//! than that. Addresses are stored so the placement workflow can snapshot
//! them and touch `last_used_at`.

use serde::{Deserialize, Serialize};

use super::order::AddressSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAddress {
    pub id: String,
    pub user_id: String,
    pub line: String,
    pub zip: String,
    pub contact_name: String,
    pub contact_phone: String,
    pub last_used_at: Option<i64>,
}

impl UserAddress {
    /// Freeze the address into an order snapshot
    pub fn snapshot(&self) -> AddressSnapshot {
        AddressSnapshot {
            line: self.line.clone(),
            zip: self.zip.clone(),
            contact_name: self.contact_name.clone(),
            contact_phone: self.contact_phone.clone(),
        }
    }
}
