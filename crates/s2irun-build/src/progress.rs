use indicatif::{ProgressBar, ProgressStyle};

/// デーモンビルド中のスピナー
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(image: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Building {}...", image));
        pb.enable_steady_tick(std::time::Duration::from_millis(120));

        Self { progress_bar: pb }
    }

    /// スピナーを表示したまま1行出力
    pub fn println(&self, line: &str) {
        self.progress_bar.println(line);
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message("Build completed ✓");
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let progress = BuildProgress::new("alice/app:latest");
        progress.set_message("Step 1/4");
        progress.println("---> Running in 1234");
        progress.finish_error("assemble exited with 1");
    }
}
