use crate::{analytics::StatsSnapshot, errors::FailureKind, limiters::LimiterKind};

/// Render a stats snapshot as `key=value` lines.
pub fn format_stats(stats: &StatsSnapshot) -> String {
    let mut lines = vec![
        format!("connections_opened={}", stats.connections_opened),
        format!("connections_closed={}", stats.connections_closed),
        format!("live_sessions={}", stats.live_sessions),
        format!("auth_failures={}", stats.auth_failures),
    ];

    for limiter in LimiterKind::ALL {
        lines.push(format!(
            "admitted_{}={}",
            limiter.as_str(),
            stats.admitted(limiter)
        ));
        lines.push(format!("denied_{}={}", limiter.as_str(), stats.denied(limiter)));
    }

    lines.push(format!("bytes_in={}", stats.bytes_in));
    lines.push(format!("bytes_out={}", stats.bytes_out));
    lines.push(format!("quality_downscales={}", stats.downscales));
    lines.push(format!("quality_upscales={}", stats.upscales));
    lines.push(format!("closed_normal={}", stats.closed_normal));
    lines.push(format!("closed_stale={}", stats.closed_stale));

    for kind in FailureKind::ALL {
        lines.push(format!("failures_{}={}", kind.as_str(), stats.failures(kind)));
    }

    match stats.mean_inference() {
        Some(mean) => lines.push(format!("inference_mean_ms={:.1}", mean.as_secs_f64() * 1000.0)),
        None => lines.push("inference_mean_ms=-".to_string()),
    }

    lines.join("\n")
}
