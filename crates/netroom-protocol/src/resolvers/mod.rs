//! Built-in resolvers, one module per resolution tier.

pub(crate) mod dynamic;
pub(crate) mod explicit;
pub(crate) mod implicit;

pub use dynamic::{
    EnumResolver, FieldsResolver, ManualResolver, MapResolver, OptionResolver, SeqResolver,
    TupleResolver,
};
pub use implicit::{ImplicitMapResolver, ImplicitSeqResolver};
