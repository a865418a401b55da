use crate::config::FallbackSection;

const EMPTY_OUTPUT: &str = "transcoder exited without diagnostic output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    RetryWithTestPattern,
    PropagateFailure(String),
}

/// Decides, from the output of a transcoder that died during its grace
/// interval, whether the source was merely unreachable.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    enabled: bool,
    signatures: Vec<String>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::from_config(&FallbackSection::default())
    }
}

impl FallbackPolicy {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            signatures: signatures
                .into_iter()
                .map(Into::into)
                .filter(|signature: &String| !signature.is_empty())
                .collect(),
        }
    }

    pub fn from_config(section: &FallbackSection) -> Self {
        let mut policy = Self::new(section.signatures.iter().cloned());
        policy.enabled = section.enabled;
        policy
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            signatures: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn matched_signature(&self, output: &str) -> Option<&str> {
        self.signatures
            .iter()
            .find(|signature| output.contains(signature.as_str()))
            .map(String::as_str)
    }

    pub fn decide(&self, output: &str) -> FallbackDecision {
        if self.enabled && self.matched_signature(output).is_some() {
            return FallbackDecision::RetryWithTestPattern;
        }
        let trimmed = output.trim();
        if trimmed.is_empty() {
            FallbackDecision::PropagateFailure(EMPTY_OUTPUT.to_string())
        } else {
            FallbackDecision::PropagateFailure(trimmed.to_string())
        }
    }
}

/// [`FallbackPolicy::decide`] with the built-in signatures.
pub fn decide(output: &str) -> FallbackDecision {
    FallbackPolicy::default().decide(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DNS_FAILURE: &str = "[tcp @ 0x5581] Failed to resolve hostname bad.invalid: Name or service not known\n\
        rtsp://bad.invalid/stream: Input/output error";
    const OPEN_FAILURE: &str = "[in#0 @ 0x55] Error opening input: No such file or directory\n\
        Error opening input file /media/missing.mp4.";

    #[test]
    fn hostname_failure_retries_with_test_pattern() {
        assert_eq!(decide(DNS_FAILURE), FallbackDecision::RetryWithTestPattern);
    }

    #[test]
    fn input_open_failure_retries_with_test_pattern() {
        assert_eq!(decide(OPEN_FAILURE), FallbackDecision::RetryWithTestPattern);
    }

    #[test]
    fn unrelated_failure_propagates_raw_output() {
        let output = "/srv/static/stream.m3u8: Permission denied\n";
        assert_eq!(
            decide(output),
            FallbackDecision::PropagateFailure(
                "/srv/static/stream.m3u8: Permission denied".to_string()
            )
        );
    }

    #[test]
    fn empty_output_propagates_placeholder() {
        assert_eq!(
            decide("  \n"),
            FallbackDecision::PropagateFailure(EMPTY_OUTPUT.to_string())
        );
    }

    #[test]
    fn disabled_policy_never_retries() {
        assert!(matches!(
            FallbackPolicy::disabled().decide(DNS_FAILURE),
            FallbackDecision::PropagateFailure(_)
        ));
    }

    #[test]
    fn custom_signatures_replace_defaults() {
        let policy = FallbackPolicy::new(["Connection refused", ""]);
        assert_eq!(
            policy.decide("rtsp://10.0.0.9/live: Connection refused"),
            FallbackDecision::RetryWithTestPattern
        );
        assert!(matches!(
            policy.decide(DNS_FAILURE),
            FallbackDecision::PropagateFailure(_)
        ));
        assert_eq!(
            policy.matched_signature("x Connection refused"),
            Some("Connection refused")
        );
    }
}
