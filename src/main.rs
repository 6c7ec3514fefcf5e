use std::{path::Path, process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vaultpress::{
    application::render::{
        BatchSession, FileListOptions, RenderOverrides, SessionHost,
        api::{begin_batch, end_batch, is_cancelled, progress, render_document_to_string, set_file_list},
    },
    config::{self, Command, RenderArgs, Settings},
    domain::document::{DocumentHandle, DocumentKind, normalize_logical_path},
    infra::{
        console::ConsoleHost, error::InfraError, store::FsDocumentStore,
        surface::ComrakSurfaceProvider, telemetry,
    },
};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(error) => {
            report_application_error(&error);
            process::exit(1);
        }
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

/// Returns `false` when the batch finished with errors or was cancelled.
async fn run() -> Result<bool, InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;
    telemetry::init(&settings.logging)?;

    match cli_args.command_or_default() {
        Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<bool, InfraError> {
    let store = Arc::new(FsDocumentStore::open(&settings.vault.root).await?);
    let documents = select_documents(&store, &settings, &args)?;
    if documents.is_empty() {
        warn!(target = "vaultpress::render", op = "select", "no documents to render");
        return Ok(true);
    }

    let console = Arc::new(ConsoleHost::new());
    let session = BatchSession::new(
        SessionHost {
            provider: Arc::new(ComrakSurfaceProvider::new(Arc::clone(&store))),
            store: store.clone(),
            display: console.clone(),
        },
        settings.export.render_defaults(),
        settings.timings,
        settings.export.verbosity,
    );

    begin_batch(&session, RenderOverrides::default())
        .await
        .map_err(|err| InfraError::configuration(format!("failed to open render batch: {err}")))?;

    let labels: Vec<String> = documents.iter().map(|doc| doc.path().to_string()).collect();
    let total = documents.len();
    let mut written = 0usize;

    for (index, document) in documents.iter().enumerate() {
        if is_cancelled(&session) {
            break;
        }
        set_file_list(
            &session,
            &labels,
            &FileListOptions {
                title: Some("Exporting".to_string()),
                active: Some(index),
            },
        );
        progress(
            &session,
            index as f64 / total as f64,
            &format!("Rendering {}/{total}", index + 1),
            document.path(),
        );

        let Some(html) =
            render_document_to_string(&session, document, RenderOverrides::default()).await
        else {
            continue;
        };
        write_output(&settings.vault.output_dir, document, &html).await?;
        written += 1;
    }

    progress(&session, 1.0, "Export finished", "");
    let clean = written == total && !session.error_occurred() && !session.is_cancelled();
    end_batch(&session);

    info!(
        target = "vaultpress::render",
        op = "export",
        documents = total,
        written,
        result = if clean { "ok" } else { "errors" },
        "export finished"
    );
    Ok(clean)
}

/// Positional arguments win, then `export.files_to_export`, then every note and
/// canvas in the vault.
fn select_documents(
    store: &FsDocumentStore,
    settings: &Settings,
    args: &RenderArgs,
) -> Result<Vec<DocumentHandle>, InfraError> {
    let requested: Vec<&str> = if !args.files.is_empty() {
        args.files.iter().map(String::as_str).collect()
    } else {
        settings
            .export
            .files_to_export
            .iter()
            .map(String::as_str)
            .collect()
    };

    if requested.is_empty() {
        return Ok(store
            .documents()
            .filter(|doc| matches!(doc.kind(), DocumentKind::Markdown | DocumentKind::Canvas))
            .cloned()
            .collect());
    }

    requested
        .into_iter()
        .map(|path| {
            normalize_logical_path(path)
                .ok()
                .and_then(|normalized| store.get(&normalized).cloned())
                .ok_or_else(|| InfraError::configuration(format!("`{path}` is not in the vault")))
        })
        .collect()
}

async fn write_output(
    output_dir: &Path,
    document: &DocumentHandle,
    html: &str,
) -> Result<(), InfraError> {
    let target = format!("{}.html", document.path())
        .split('/')
        .fold(output_dir.to_path_buf(), |path, segment| path.join(segment));
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, html).await?;
    info!(
        target = "vaultpress::render",
        op = "write",
        path = document.path(),
        output = %target.display(),
        bytes = html.len(),
        "document written"
    );
    Ok(())
}
