use crate::errors::ErrorInfo;

/// Where one pipeline run stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    DirectoriesReady,
    Downloaded,
    Verified,
    Extracted,
    Tagged,
    Launched,
    Failed(ErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    DirectoriesReady,
    /// The tag on disk already matches the requested release.
    TagFound,
    Downloaded,
    Verified,
    /// Unsigned file accepted because signatures are not required.
    VerificationSkipped,
    Extracted,
    TagWritten,
    Launched,
    Failed(ErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub event: PipelineEvent,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Launched | Self::Failed(_))
    }

    pub fn next(&self, event: PipelineEvent) -> Result<PipelineState, InvalidTransition> {
        use PipelineEvent as E;
        use PipelineState as S;

        let next = match (self, &event) {
            (s, E::Failed(error)) if !s.is_terminal() => S::Failed(error.clone()),
            (S::NotStarted, E::DirectoriesReady) => S::DirectoriesReady,
            (S::DirectoriesReady, E::TagFound) => S::Tagged,
            // A release with nothing for this platform installs nothing.
            (S::DirectoriesReady, E::TagWritten) => S::Tagged,
            (S::DirectoriesReady | S::Extracted, E::Downloaded) => S::Downloaded,
            (S::Downloaded, E::Verified | E::VerificationSkipped) => S::Verified,
            (S::Verified, E::Extracted) => S::Extracted,
            (S::Extracted, E::TagWritten) => S::Tagged,
            (S::Tagged, E::Launched) => S::Launched,
            _ => {
                return Err(InvalidTransition {
                    from: self.clone(),
                    event: event.clone(),
                });
            }
        };
        Ok(next)
    }
}

/// Every state a run went through, starting at [`PipelineState::NotStarted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    history: Vec<PipelineState>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self {
            history: vec![PipelineState::NotStarted],
        }
    }
}

impl PipelineRun {
    pub fn state(&self) -> &PipelineState {
        // history is never empty
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn visited(&self, state: &PipelineState) -> bool {
        self.history.contains(state)
    }

    pub fn apply(&mut self, event: PipelineEvent) -> Result<&PipelineState, InvalidTransition> {
        let next = self.state().next(event)?;
        tracing::debug!(from = ?self.state(), to = ?next, "Pipeline transition");
        self.history.push(next);
        Ok(self.state())
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self.state() {
            PipelineState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Self, ErrorInfo> {
        if let Some(error) = self.error() {
            return Err(error.clone());
        }
        Ok(self)
    }
}
