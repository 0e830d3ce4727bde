use fleetfix::run_tracker::RepoStatus;
use std::time::Instant;

pub struct ProgressIndicator {
    total: usize,
    processed: usize,
    patched: usize,
    compliant: usize,
    skipped: usize,
    failed: usize,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            patched: 0,
            compliant: 0,
            skipped: 0,
            failed: 0,
            start_time: Instant::now(),
        }
    }

    pub fn start_item(&self, name: &str) {
        println!("\n{}", "=".repeat(60));
        println!("Processing: {} ({}/{})", name, self.processed + 1, self.total);
        println!("{}", "=".repeat(60));
    }

    pub fn complete_item(&mut self, name: &str, status: RepoStatus) {
        self.processed += 1;
        match status {
            RepoStatus::Patched | RepoStatus::PrOpened => self.patched += 1,
            RepoStatus::NoDrift => self.compliant += 1,
            RepoStatus::Skipped => self.skipped += 1,
            RepoStatus::Failed => self.failed += 1,
        }
        println!("  {} -> {:?}", name, status);
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed();
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Total:     {}", self.total);
        println!("  Patched:   {}", self.patched);
        println!("  Compliant: {}", self.compliant);
        println!("  Skipped:   {}", self.skipped);
        println!("  Failed:    {}", self.failed);
        println!("  Duration:  {:.2}s", elapsed.as_secs_f64());
        println!("{}", "=".repeat(60));
    }
}
