use thiserror::Error;

#[derive(Error, Debug)]
pub enum EqError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },
}
