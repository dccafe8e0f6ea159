//! Command implementations.

use crate::cli::DevArgs;
use crate::ui;
use miette::{miette, Result};
use react_client::config::{ProjectConfig, ServerOptions, ServerSection};

/// Run the `dev` command: resolve the project configuration and hand it
/// to the server core until shutdown.
pub async fn dev(args: DevArgs) -> Result<()> {
    ui::info("Starting development server...");

    let options = ServerOptions {
        root: args.root,
        server: ServerSection {
            port: args.port,
            open: Some(!args.no_open),
        },
        ..Default::default()
    };

    let config = ProjectConfig::resolve(options).map_err(|e| miette!("{e}"))?;
    ui::info(&format!("Project root: {}", config.root_dir.display()));
    ui::info(&format!("Entry point: {}", config.entry_file.display()));

    react_client::serve(config).await.map_err(|e| miette!("{e}"))?;

    ui::success("Development server stopped");
    Ok(())
}
