pub mod components;
pub mod dashboard;
pub mod install;
pub mod load;
pub mod routing;
pub mod version;

use anyhow::Result;
use tracing::{info, warn};
use yard_apply::{ApplyReport, DeleteReport, Outcome};
use yard_install::{Component, Dump, InstallOptions, Installer};

/// Installs a component, or prints its manifest when `dump` is set.
pub async fn install_component(installer: &Installer, component: Component, opts: &InstallOptions, dump: bool) -> Result<()> {
    if dump {
        match installer.dump(component, opts).await? {
            Dump::Manifest(yaml) => print!("{}", yaml),
            Dump::CrdsOnly(yaml) => {
                eprintln!("The same command should be run after the CRDs are installed successfully to install the rest of the resources.");
                print!("{}", yaml);
            }
        }
        return Ok(());
    }
    let report = installer.install(component, opts).await?;
    log_apply(component, &report);
    Ok(())
}

/// Removes a component, or prints the removal manifest when `dump` is set.
pub async fn uninstall_component(installer: &Installer, component: Component, opts: &InstallOptions, dump: bool) -> Result<()> {
    if dump {
        print!("{}", installer.dump_removal(component, opts)?);
        return Ok(());
    }
    let report = installer.uninstall(component, opts).await?;
    log_delete(component, &report);
    Ok(())
}

fn log_apply(component: Component, report: &ApplyReport) {
    info!(
        component = %component,
        created = report.count(Outcome::Created),
        configured = report.count(Outcome::Configured),
        unchanged = report.count(Outcome::Unchanged),
        "{} installed", component
    );
    if report.hook_errors > 0 { warn!(component = %component, hook_errors = report.hook_errors, "some post-apply checks failed"); }
}

fn log_delete(component: Component, report: &DeleteReport) {
    let failed = report.count(Outcome::Failed);
    info!(
        component = %component,
        deleted = report.count(Outcome::Deleted),
        missing = report.count(Outcome::Missing),
        failed,
        "{} uninstalled", component
    );
    if failed > 0 || report.hook_errors > 0 {
        warn!(component = %component, failed, hook_errors = report.hook_errors, "uninstall left some resources behind");
    }
}
