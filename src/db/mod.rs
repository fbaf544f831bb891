pub mod connection;
pub mod daily;
pub mod machines;
pub(crate) mod schema;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod transactions;

pub use connection::{DbPool, init_db};
pub use daily::{compare_and_add, ensure_daily_record, get_daily_record};
pub use machines::{
    CreateMachineArgs, MachineUpdate, commit_wash_start, compare_and_set, create_machine,
    delete_machine, get_machine, list_machines, seed_default_machines,
};
pub use transactions::{get_lifetime_totals, get_recent_transactions};
