use super::SessionOutcome;

/// Print run statistics to stdout
pub fn print_summary(outcome: &SessionOutcome) {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                     Build Metrics Summary                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📊 Overview");
    println!("   ├─ Exit code: {}", outcome.exit_code);
    println!("   ├─ Duration: {:.2}s", outcome.elapsed.as_secs_f64());
    println!("   ├─ Output lines: {}", outcome.log_lines);
    println!(
        "   └─ Metrics: {}",
        if outcome.collected { "collected" } else { "disabled" }
    );

    if let Some(dispatch) = &outcome.dispatch {
        println!("\n📤 Dispatcher");
        println!("   ├─ Actions queued: {}", dispatch.queued_count);
        println!("   ├─ Actions executed: {}", dispatch.executed_count);
        println!("   ├─ Failures: {}", dispatch.failure_count);
        println!("   ├─ Dropped: {}", dispatch.dropped_count);
        println!("   └─ Latency (ms): {}", dispatch.latency_ms);
    }

    if let Some(receipt) = &outcome.receipt {
        println!("\n🧾 {receipt}");
    }

    println!();
}
