//! Startup table preparation driven by configuration flags.

use tracing::info;

use sakaki_common::config::Config;
use sakaki_kvs::{Database, KvsError};

const TEST_TABLES: &[&str] = &["T0", "T1", "T2", "T10", "T20"];

const BENCHMARK_TABLES: &[&str] = &[
    "WAREHOUSE",
    "DISTRICT",
    "CUSTOMER",
    "CUSTOMER_SECONDARY",
    "NEW_ORDER",
    "ORDERS",
    "ORDERS_SECONDARY",
    "ORDER_LINE",
    "ITEM",
    "STOCK",
];

/// Creates the table sets requested by the configuration flags.
pub fn prepare_startup_tables(db: &dyn Database, config: &Config) -> Result<(), KvsError> {
    if config.prepare_test_tables {
        for name in TEST_TABLES {
            db.get_or_create_storage(name)?;
        }
        info!(count = TEST_TABLES.len(), "prepared test tables");
    }
    if config.prepare_benchmark_tables {
        for name in BENCHMARK_TABLES {
            db.get_or_create_storage(name)?;
        }
        info!(count = BENCHMARK_TABLES.len(), "prepared benchmark tables");
    }
    Ok(())
}
