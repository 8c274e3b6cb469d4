//! Best-effort GPU probes via `nvidia-smi`.

use std::process::Stdio;

use tokio::process::Command;

/// Whether an NVIDIA GPU is visible.
pub async fn gpu_available() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Current GPU memory usage in MiB, 0 when no GPU is present.
pub async fn gpu_mem_used_mb() -> u64 {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.used", "--format=csv,nounits,noheader"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|l| l.trim().parse::<u64>().ok())
            .max()
            .unwrap_or(0),
        _ => 0,
    }
}
