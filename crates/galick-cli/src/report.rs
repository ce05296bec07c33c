use std::fmt::Write as _;
use std::time::Duration;

use galick_core::metrics::StatsSnapshot;

/// Render the final summary block printed on TUI exit and in headless mode.
///
/// Latency lines are emitted only when at least one request completed.
pub fn render(snapshot: &StatsSnapshot, elapsed: Duration) -> String {
    let elapsed_secs = elapsed.as_secs_f64();
    let mean_qps = if elapsed_secs > 0.0 {
        snapshot.total_requests as f64 / elapsed_secs
    } else {
        0.0
    };

    let mut out = String::new();
    out.push_str("\n TEST COMPLETED \n\n");
    let _ = writeln!(out, "  Duration:    {elapsed:.2?}");
    let _ = writeln!(out, "  Requests:    {}", snapshot.total_requests);
    let _ = writeln!(out, "  Mean QPS:    {mean_qps:.2}");
    let _ = writeln!(out, "  Success:     {:.2}%", snapshot.success_rate() * 100.0);

    if snapshot.total_requests > 0 {
        let _ = writeln!(out, "  P50 Latency: {:.2?}", snapshot.quantile(0.50));
        let _ = writeln!(out, "  P95 Latency: {:.2?}", snapshot.quantile(0.95));
        let _ = writeln!(out, "  P99 Latency: {:.2?}", snapshot.quantile(0.99));
        let _ = writeln!(out, "  Max Latency: {:.2?}", snapshot.max());
    }
    out.push('\n');

    out
}
