pub(crate) mod outbound;
pub(crate) mod ping;
pub(crate) mod read;
