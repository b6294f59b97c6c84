//! Domain models for agency-service.

mod audit;
mod catalog;
mod comment;
mod content_item;
mod device;
mod invoice;
mod media;
mod payment;
mod user;
mod verification;

pub use audit::{ChangeLogEntry, FieldDelta};
pub use catalog::{BusinessInfo, PipelineBatch, Service};
pub use comment::{author_role_for, CommentRead, ContentComment, CreateComment};
pub use content_item::{
    can_move, ApprovalRequest, ApprovalStatus, ContentItem, CreateContentItem, KanbanColumn,
    ListContentItemsFilter, MoveRequest, MoveTarget, PostAction, Priority, ScheduleRequest,
    UpdateContentItem,
};
pub use device::{DeviceToken, RegisterDevice};
pub use invoice::{
    client_code_candidates, compose_invoice_number, compute_totals, line_total, CreateInvoice,
    Invoice, InvoiceItem, InvoiceStatus, ListInvoicesFilter, NewInvoiceItem, UpdateInvoice,
    UpdateInvoiceItem,
};
pub use media::{AttachMedia, MediaAsset, MediaType};
pub use payment::{derive_status, Payment, PaymentMode, RecordPayment};
pub use user::{ClientProfile, User, UserRole};
pub use verification::{ConfirmVerification, PendingVerification, RequestVerification};
