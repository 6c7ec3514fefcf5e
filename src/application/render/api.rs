//! Entry points for callers: document and markdown rendering, explicit batch
//! bracketing and the progress/logging surface.
//!
//! Every render call merges its overrides over the session defaults. Calls made
//! outside an explicit batch run inside an implicit one that closes when the
//! call returns.

use crate::domain::{
    document::{DocumentHandle, DocumentSource},
    tree::Fragment,
};

use super::{
    renderer::render_file,
    session::BatchSession,
    surface::FileListOptions,
    types::{RenderError, RenderOptions, RenderOverrides},
};

fn options_for(session: &BatchSession, overrides: RenderOverrides) -> RenderOptions {
    RenderOptions::merged(session.defaults(), overrides)
}

/// Renders a vault document. `None` when it failed or the batch was cancelled.
pub async fn render_document_to_element(
    session: &BatchSession,
    document: &DocumentHandle,
    overrides: RenderOverrides,
) -> Option<Fragment> {
    let options = options_for(session, overrides);
    render_file(session, &DocumentSource::File(document.clone()), &options)
        .await
        .map(|result| result.content)
}

pub async fn render_document_to_string(
    session: &BatchSession,
    document: &DocumentHandle,
    overrides: RenderOverrides,
) -> Option<String> {
    render_document_to_element(session, document, overrides)
        .await
        .map(|fragment| fragment.to_html())
}

/// Renders free-standing markdown text through the same pipeline as a note.
pub async fn render_markdown_to_element(
    session: &BatchSession,
    markdown: &str,
    overrides: RenderOverrides,
) -> Option<Fragment> {
    let options = options_for(session, overrides);
    render_file(session, &DocumentSource::markdown(markdown), &options)
        .await
        .map(|result| result.content)
}

pub async fn render_markdown_to_string(
    session: &BatchSession,
    markdown: &str,
    overrides: RenderOverrides,
) -> Option<String> {
    render_markdown_to_element(session, markdown, overrides)
        .await
        .map(|fragment| fragment.to_html())
}

/// Opens an explicit batch for a multi-document export.
pub async fn begin_batch(
    session: &BatchSession,
    overrides: RenderOverrides,
) -> Result<(), RenderError> {
    let options = options_for(session, overrides);
    session.begin(&options).await
}

pub fn end_batch(session: &BatchSession) {
    session.end();
}

/// Cancellation check for callers looping over documents. Ends the batch once
/// cancellation is observed.
pub fn is_cancelled(session: &BatchSession) -> bool {
    session.check_cancelled()
}

pub fn log(session: &BatchSession, title: &str, message: &str) {
    session.log(title, message);
}

pub fn warning(session: &BatchSession, title: &str, message: &str) {
    session.warning(title, message);
}

pub fn error(session: &BatchSession, title: &str, message: &str, fatal: bool) {
    session.error(title, message, fatal);
}

pub fn progress(session: &BatchSession, fraction: f64, message: &str, sub_message: &str) {
    session.progress(fraction, message, sub_message);
}

pub fn set_file_list(session: &BatchSession, items: &[String], options: &FileListOptions) {
    session.set_file_list(items, options);
}
