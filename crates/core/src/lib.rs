pub mod audit;
pub mod config;
pub mod convert;
pub mod domain;
pub mod errors;
pub mod export;
pub mod matrix;
pub mod negotiation;
pub mod normalize;
pub mod ports;
pub mod ranking;
pub mod service;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use convert::{
    convert, ConversionError, ConversionRequest, IncotermDelta, IncotermPolicy, RateTable,
};
pub use domain::award::{ActorId, Award, AwardId, AwardStatus};
pub use domain::quote::{
    PricedQuote, QuoteLineItemPrice, QuoteStatus, SupplierId, SupplierQuote, SupplierQuoteId,
};
pub use domain::rfq::{LineItem, LineItemId, Rfq, RfqId, RfqStatus};
pub use domain::terms::Incoterm;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use matrix::{ComparisonMatrix, MatrixCell, MatrixColumn, MatrixOptions};
pub use negotiation::{NegotiationEngine, NegotiationError};
pub use normalize::{NormalizationSettings, NormalizedMatrix, UomTarget};
pub use ranking::{CellClass, RankedMatrix, RankingConfig};
pub use service::{
    ComparisonOptions, ComparisonResult, ProcurementService, RequestContext, ServiceSettings,
};
