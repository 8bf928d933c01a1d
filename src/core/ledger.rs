use serde::Serialize;

pub const CHECK_CAMERA: &str = "camera_access";
pub const CHECK_LIVENESS: &str = "liveness_detection";
pub const CHECK_EXTRACTION: &str = "embedding_extraction";
pub const CHECK_QUALITY: &str = "quality_assessment";
pub const CHECK_ANTI_SPOOFING: &str = "anti_spoofing";
pub const CHECK_AGGREGATION: &str = "template_aggregation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pending,
    Checking,
    Passed,
    Failed,
}

impl CheckStatus {
    fn rank(self) -> u8 {
        match self {
            CheckStatus::Pending => 0,
            CheckStatus::Checking => 1,
            CheckStatus::Passed | CheckStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityCheck {
    pub name: String,
    pub status: CheckStatus,
    pub description: String,
}

/// Named security check statuses surfaced to the UI.
///
/// Within one session a status only moves forward: pending, then checking,
/// then passed or failed. Starting a new session puts everything back to
/// pending.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityCheckLedger {
    checks: Vec<SecurityCheck>,
}

impl Default for SecurityCheckLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityCheckLedger {
    pub fn new() -> Self {
        let checks = [
            (CHECK_CAMERA, "Camera acquired for exclusive use"),
            (CHECK_LIVENESS, "Each capture shows a live subject"),
            (CHECK_EXTRACTION, "Face embedding extracted from each capture"),
            (CHECK_QUALITY, "Each capture meets the minimum quality"),
            (CHECK_ANTI_SPOOFING, "Capture window shows no presentation attack"),
            (CHECK_AGGREGATION, "Accepted captures combined into one template"),
        ]
        .into_iter()
        .map(|(name, description)| SecurityCheck {
            name: name.to_string(),
            status: CheckStatus::Pending,
            description: description.to_string(),
        })
        .collect();

        Self { checks }
    }

    pub fn checks(&self) -> &[SecurityCheck] {
        &self.checks
    }

    pub fn status(&self, name: &str) -> Option<CheckStatus> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.status)
    }

    /// Moves a check forward. Unknown names and backward moves are ignored
    /// and reported as `false`.
    pub fn advance(&mut self, name: &str, status: CheckStatus) -> bool {
        let Some(check) = self.checks.iter_mut().find(|c| c.name == name) else {
            tracing::warn!(check = name, "unknown security check");
            return false;
        };

        if check.status == status {
            return true;
        }
        if status.rank() <= check.status.rank() {
            tracing::warn!(
                check = name,
                from = ?check.status,
                to = ?status,
                "refusing to move security check backwards"
            );
            return false;
        }

        check.status = status;
        true
    }

    pub fn reset(&mut self) {
        for check in &mut self.checks {
            check.status = CheckStatus::Pending;
        }
    }
}
