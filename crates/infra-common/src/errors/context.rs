use crate::errors::types::Error;
use std::fmt;

/// Where an error happened: the component and the operation it was running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for attaching an [`ErrorContext`] to errors and results
pub trait ErrorExt {
    type Output;

    /// Add context to an error
    fn context(self, ctx: ErrorContext) -> Self::Output;

    /// Add simple context with component and operation
    fn with_context<S: Into<String>, T: Into<String>>(self, component: S, operation: T) -> Self::Output
    where
        Self: Sized,
    {
        self.context(ErrorContext::new(component, operation))
    }
}

impl ErrorExt for Error {
    type Output = Error;

    fn context(self, ctx: ErrorContext) -> Error {
        match self {
            Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
            Error::Logging(msg) => Error::Logging(format!("{} [{}]", msg, ctx)),
            Error::Internal(msg) => Error::Internal(format!("{} [{}]", msg, ctx)),
            Error::Custom(msg) => Error::Custom(format!("{} [{}]", msg, ctx)),
        }
    }
}

impl<T> ErrorExt for Result<T, Error> {
    type Output = Result<T, Error>;

    fn context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| e.context(ctx))
    }
}
