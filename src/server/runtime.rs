/// Container-aware CPU limit detection for sizing the tokio worker thread
/// pool. Without this, tokio defaults to the host CPU count, which
/// over-provisions threads when the emitter runs in a container limited to a
/// few cores on a large host.
///
/// Detection order: `ROUTE_EMITTER_CPU_LIMIT` env var ("2" or "2000m"),
/// cgroup v2 `cpu.max`, then the host CPU count.
pub fn worker_thread_count() -> usize {
    if let Ok(value) = std::env::var("ROUTE_EMITTER_CPU_LIMIT") {
        if let Some(cores) = parse_cpu_value(&value) {
            let threads = cores.max(1);
            eprintln!("[runtime] cpu limit from ROUTE_EMITTER_CPU_LIMIT: {} threads", threads);
            return threads;
        }
    }

    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_cpu_max(&max) {
            let threads = cores.max(1);
            eprintln!("[runtime] cpu limit from cgroup v2: {} threads", threads);
            return threads;
        }
    }

    let threads = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    eprintln!("[runtime] cpu limit from host: {} threads", threads);
    threads
}

/// Accepts whole cores ("4") or millicores ("4000m").
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(millis) => millis.parse::<usize>().ok().map(|m| m / 1000),
        None => value.parse::<usize>().ok(),
    }
}

/// cgroup v2 `cpu.max` holds "quota period", or "max period" for unlimited.
fn parse_cgroup_cpu_max(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    let quota: u64 = quota.parse().ok()?;
    let period: u64 = period.parse().ok()?;
    if quota == 0 || period == 0 {
        return None;
    }
    Some((quota / period) as usize)
}
