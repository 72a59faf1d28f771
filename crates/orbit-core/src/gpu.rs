use tokio::process::Command;

/// Count the NVIDIA GPUs visible on this host.
///
/// Absent driver, missing binary or a non-zero exit all read as zero
/// GPUs; a worker without accelerators is a normal configuration.
pub async fn detect_gpu_count() -> u32 {
    let output = Command::new("nvidia-smi").arg("-L").output().await;

    let Ok(output) = output else {
        return 0;
    };
    if !output.status.success() {
        return 0;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count() as u32
}

#[cfg(test)]
mod tests {
    #[test]
    fn gpu_listing_lines_are_counted() {
        let listing = "GPU 0: NVIDIA A100 (UUID: GPU-aaa)\nGPU 1: NVIDIA A100 (UUID: GPU-bbb)\n";
        let count = listing
            .lines()
            .filter(|line| line.trim_start().starts_with("GPU "))
            .count();
        assert_eq!(count, 2);
    }
}
