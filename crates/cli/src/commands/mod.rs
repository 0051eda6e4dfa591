//! Command implementations.

mod run;
mod validate;

pub use run::run_relay;
pub use send_test::run_test;
pub use validate::run_validate;

use contracts::Destination;
use dispatcher::StatsSnapshot;

/// Print per-output counters after a run
fn print_stats(stats: &[(Destination, StatsSnapshot)]) {
    println!("\n=== Output Statistics ===\n");
    if stats.is_empty() {
        println!("  (no outputs enabled)");
    }
    for (destination, snapshot) in stats {
        println!(
            "  {:<14} total: {:<8} ok: {:<8} error: {}",
            destination.as_str(),
            snapshot.total,
            snapshot.ok,
            snapshot.error
        );
    }
    println!();
}
