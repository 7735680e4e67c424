//! Read-only views over the ERP tables that make up material lineage.
//!
//! These tables are owned and written by the purchasing, production and sales
//! workflows. The traceability engine only queries them.

pub mod customer;
pub mod product;
pub mod production_order;
pub mod purchase_order;
pub mod sales_order;
pub mod serial_number;
pub mod spool;
pub mod spool_usage;
pub mod vendor;
