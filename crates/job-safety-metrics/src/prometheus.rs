use crate::MetricsSnapshot;
use std::fmt::Write;

/// Renders `snapshot` in the Prometheus text exposition format.
pub fn render(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let gauges: [(&str, &str, f64); 5] = [
        (
            "retry_rate_per_minute",
            "Number of retries per minute",
            snapshot.retry_rate_per_minute,
        ),
        (
            "retry_success_rate",
            "Retry success rate (0.0 to 1.0)",
            snapshot.success_rate,
        ),
        (
            "retry_failure_rate",
            "Retry failure rate (0.0 to 1.0)",
            snapshot.failure_rate,
        ),
        (
            "retry_avg_attempts",
            "Average number of retry attempts",
            snapshot.avg_attempts,
        ),
        (
            "retry_block_rate",
            "Rate of blocked retries (0.0 to 1.0)",
            snapshot.block_rate,
        ),
    ];
    for (name, help, value) in gauges {
        header(&mut out, name, help, "gauge");
        let _ = writeln!(out, "{name} {value}\n");
    }

    let counters: [(&str, &str, u64); 4] = [
        ("retry_total_count", "Total number of retries", snapshot.total_retries),
        (
            "retry_total_successes",
            "Total number of successful retries",
            snapshot.total_successes,
        ),
        (
            "retry_total_failures",
            "Total number of failed retries",
            snapshot.total_failures,
        ),
        (
            "retry_total_blocks",
            "Total number of blocked retries",
            snapshot.total_blocks,
        ),
    ];
    for (name, help, value) in counters {
        header(&mut out, name, help, "counter");
        let _ = writeln!(out, "{name} {value}\n");
    }

    if !snapshot.job_types.is_empty() {
        header(
            &mut out,
            "retry_job_type_total",
            "Retry events per job type",
            "counter",
        );
        for metrics in snapshot.job_types.values() {
            let job_type = escape(&metrics.job_type);
            for (event, value) in [
                ("retry", metrics.retry_count),
                ("success", metrics.success_count),
                ("failure", metrics.failure_count),
                ("blocked", metrics.block_count),
            ] {
                let _ = writeln!(
                    out,
                    "retry_job_type_total{{job_type=\"{job_type}\",event=\"{event}\"}} {value}"
                );
            }
        }
        out.push('\n');
    }

    if !snapshot.block_reasons.is_empty() {
        header(
            &mut out,
            "retry_block_reason_total",
            "Blocked retries per reason",
            "counter",
        );
        for (reason, count) in &snapshot.block_reasons {
            let _ = writeln!(
                out,
                "retry_block_reason_total{{reason=\"{}\"}} {count}",
                escape(reason)
            );
        }
        out.push('\n');
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn escape(label: &str) -> String {
    let mut escaped = String::with_capacity(label.len());
    for c in label.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
