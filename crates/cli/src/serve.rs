//! Serves an export destination over HTTP so a STAC browser can read it.

use axum::{Router, response::Redirect, routing::get};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// The hosted STAC browser used when there's no local one.
pub const STAC_BROWSER_URL: &str = "https://radiantearth.github.io/stac-browser/#/external/";

/// The directories behind a server.
#[derive(Debug, Clone)]
pub struct Site {
    /// The export destination, served at `/data`.
    pub data: PathBuf,

    /// Static viewer pages, served at `/ui`.
    pub ui: Option<PathBuf>,

    /// A local STAC browser build, served at `/`.
    ///
    /// Without one, `/` redirects to the hosted browser.
    pub browser: Option<PathBuf>,
}

impl Site {
    /// Returns the router for this site.
    ///
    /// `port` is the port the catalog is reachable on, for the browser
    /// redirect.
    pub fn router(&self, port: u16) -> Router {
        let mut router = Router::new().nest_service("/data", ServeDir::new(&self.data));
        if let Some(ui) = &self.ui {
            router = router.nest_service("/ui", ServeDir::new(ui));
        }
        router = match &self.browser {
            Some(browser) => router.fallback_service(ServeDir::new(browser)),
            None => {
                let url = browser_url(port);
                router.route("/", get(move || async move { Redirect::temporary(&url) }))
            }
        };
        router
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Binds `addr` and serves until the process is stopped.
    pub async fn serve(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router(local_addr.port());
        eprintln!(
            "Serving {} at http://{local_addr}/data, browse it at {}",
            self.data.display(),
            match &self.browser {
                Some(_) => format!("http://{local_addr}/"),
                None => browser_url(local_addr.port()),
            }
        );
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Returns the hosted STAC browser url for a catalog served on `port`.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     isamples_export_cli::serve::browser_url(8000),
///     "https://radiantearth.github.io/stac-browser/#/external/http:/localhost:8000/data/stac.json?.language=en"
/// );
/// ```
pub fn browser_url(port: u16) -> String {
    format!("{STAC_BROWSER_URL}http:/localhost:{port}/data/stac.json?.language=en")
}
