pub mod comments;
pub mod database;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod providers;
pub mod provisioning;
pub mod social;
pub mod verification;

pub use comments::CommentService;
pub use database::{record_change, Database};
pub use ledger::LedgerService;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{Notifier, TokenSource};
pub use pipeline::PipelineService;
pub use providers::{
    ChannelBroker, EmailMessage, EmailProvider, FcmProvider, MockBroker, MockEmailProvider,
    MockPushProvider, ProviderError, ProviderResponse, PushMessage, PushProvider, RealtimeBroker,
    SmtpProvider,
};
pub use provisioning::{PipelineStart, ProvisioningService};
pub use social::{MetaApiError, MetaClient};
pub use verification::VerificationService;
