//! Opening task inputs on the worker side.

use std::io::Cursor;
use std::path::Path;

use tokio::fs::File;
use tracing::debug;

use common::stream::{http_source, loc_str, scheme_split, MultiReader, Source};
use common::{Error, Result};

use crate::task::{Input, Settings};

/// Open every input, in order, as one concatenated stream.
///
/// All inputs are opened up front so that a bad location fails the task
/// before any user code runs.
pub async fn open_inputs(
    client: &reqwest::Client,
    settings: &Settings,
    inputs: &[Input],
) -> Result<MultiReader> {
    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        sources.push(open_location(client, settings, &input.replica_location).await?);
    }

    Ok(MultiReader::new(sources))
}

/// Open a single input location.
pub async fn open_location(client: &reqwest::Client, settings: &Settings, location: &str) -> Result<Source> {
    let (scheme, rest) = scheme_split(location);
    match scheme {
        "disco" => {
            let (_, host, path) = loc_str(location);
            if host == settings.host {
                let relative = path.strip_prefix("disco/").unwrap_or(path);
                open_file(&settings.disco_data.join(relative)).await
            } else {
                let url = format!("http://{host}:{}/{path}", settings.port);
                http_source(client, &url).await
            }
        }
        "http" | "https" => http_source(client, location).await,
        "file" | "" => open_file(Path::new(rest)).await,
        "raw" => Ok(Box::new(Cursor::new(rest.as_bytes().to_vec()))),
        "dir" => Err(Error::NotImplemented(format!("reading `{location}`"))),
        other => Err(Error::UnsupportedScheme(other.to_string())),
    }
}

async fn open_file(path: &Path) -> Result<Source> {
    debug!("opening {}", path.display());
    Ok(Box::new(File::open(path).await?))
}
