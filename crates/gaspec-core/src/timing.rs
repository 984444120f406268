use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Upload,
    Unpack,
    Transform,
    Reduce,
    Accumulate,
    Readback,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Read,
        Stage::Upload,
        Stage::Unpack,
        Stage::Transform,
        Stage::Reduce,
        Stage::Accumulate,
        Stage::Readback,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Upload => "h2d",
            Stage::Unpack => "unpack",
            Stage::Transform => "fft",
            Stage::Reduce => "reduce",
            Stage::Accumulate => "accumulate",
            Stage::Readback => "d2h",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

pub trait StageObserver {
    fn stage_complete(&mut self, stage: Stage, elapsed: Duration);
}

pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn stage_complete(&mut self, _stage: Stage, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    total: [Duration; Stage::ALL.len()],
    calls: [u64; Stage::ALL.len()],
}

impl StageTimings {
    pub fn total(&self, stage: Stage) -> Duration {
        self.total[stage.slot()]
    }

    pub fn calls(&self, stage: Stage) -> u64 {
        self.calls[stage.slot()]
    }

    pub fn log_summary(&self, loops: u64) {
        for stage in Stage::ALL {
            tracing::info!(
                stage = stage.name(),
                loops,
                calls = self.calls(stage),
                seconds = self.total(stage).as_secs_f64(),
                "stage timing"
            );
        }
    }
}

impl StageObserver for StageTimings {
    fn stage_complete(&mut self, stage: Stage, elapsed: Duration) {
        self.total[stage.slot()] += elapsed;
        self.calls[stage.slot()] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_stage() {
        let mut t = StageTimings::default();
        t.stage_complete(Stage::Transform, Duration::from_millis(3));
        t.stage_complete(Stage::Transform, Duration::from_millis(4));
        t.stage_complete(Stage::Read, Duration::from_millis(1));
        assert_eq!(t.total(Stage::Transform), Duration::from_millis(7));
        assert_eq!(t.calls(Stage::Transform), 2);
        assert_eq!(t.calls(Stage::Reduce), 0);
        assert_eq!(t.total(Stage::Read), Duration::from_millis(1));
    }
}
