// UI and formatting module

pub mod formatters;
pub mod process_formatters;

// Re-export commonly used items for cleaner imports
pub use formatters::{format_percent, format_size, format_time, format_uptime, truncate};
pub use process_formatters::{
    print_alert, print_dump, print_event, print_process_detail, print_process_table, print_system_facts,
    print_update,
};
