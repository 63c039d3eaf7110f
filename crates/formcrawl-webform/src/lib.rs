//! formcrawl-webform: client for ASP.NET-style paged search forms
//!
//! Every result page is a form POST that must echo the hidden inputs of the
//! previous response. Detail links on a result page lead to pages holding
//! one downloadable PDF each.

pub mod client;
pub mod config;
pub mod parse;

pub use client::{WebForm, WebSession};
pub use config::{FormFields, WebFormConfig};
