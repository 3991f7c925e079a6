//! Batch pipelines driving the model client and the vault.
//!
//! - [`collect`] walks the segments of one event request, saving each
//!   window as soon as it is generated.
//! - [`details`] walks event-list notes, writes one detail note per
//!   extracted event and links it back into the list.
//!
//! Both run strictly sequentially with a fixed pause between model calls.

pub mod collect;
pub mod details;

use crate::model::ModelError;
use crate::vault::VaultError;

pub use collect::{CollectReport, Collector, SegmentResult};
pub use details::{DetailGenerator, DetailReport, DetailStatus, Progress};

/// Failure of a single generate-and-save step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl StepError {
    /// True when the step was skipped because the token budget is spent.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, StepError::Model(ModelError::BudgetExhausted { .. }))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fakes shared by the pipeline tests.

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::model::{ChatReply, ChatRequest, ClientSettings, ModelClient, Sleeper, Transport, TransportError};

    #[derive(Clone, Default)]
    pub struct FakeTransport {
        pub replies: Rc<RefCell<VecDeque<Result<ChatReply, TransportError>>>>,
        pub requests: Rc<RefCell<Vec<ChatRequest>>>,
    }

    impl FakeTransport {
        pub fn reply(&self, content: &str, tokens_used: u64) {
            self.replies.borrow_mut().push_back(Ok(ChatReply {
                content: content.to_string(),
                tokens_used,
            }));
        }

        pub fn fail(&self, err: TransportError) {
            self.replies.borrow_mut().push_back(Err(err));
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, request: &ChatRequest) -> Result<ChatReply, TransportError> {
            self.requests.borrow_mut().push(request.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connection("no scripted reply".into())))
        }
    }

    #[derive(Clone, Default)]
    pub struct CountingSleeper(pub Rc<RefCell<Vec<Duration>>>);

    impl Sleeper for CountingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    pub fn client(transport: &FakeTransport, retry_attempts: u32, max_tokens_total: u64) -> ModelClient {
        ModelClient::new(
            Box::new(transport.clone()),
            ClientSettings {
                model: "test-model".to_string(),
                max_tokens_per_request: 1000,
                max_tokens_total,
                retry_attempts,
            },
        )
        .with_sleeper(Box::new(CountingSleeper::default()))
    }
}
