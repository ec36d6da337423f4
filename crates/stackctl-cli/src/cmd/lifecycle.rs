use crate::interrupt;
use crate::output::{print_certificate, print_health, print_json, print_urls};
use stackctl_core::health::Interrupt;
use stackctl_core::workflow;
use std::path::Path;

pub fn setup(root: &Path, mode: &str, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let backend = super::backend(&settings)?;
    let report = workflow::setup(&settings, &backend, &interrupt::install())?;

    if json {
        return print_json(&report);
    }
    print_certificate(&report.certificate);
    println!();
    print_health(&report.health);
    println!();
    println!("collaborators: {}", report.collaborators.join(", "));
    let liveness = if report.liveness.healthy {
        "ok".to_string()
    } else {
        format!("FAILED ({})", report.liveness.detail)
    };
    println!("proxy liveness {}: {liveness}", report.liveness.url);
    println!();
    println!("{} stack '{}' is up:", report.profile, report.project);
    print_urls(&report.urls);
    Ok(())
}

pub fn build(root: &Path, mode: &str, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let backend = super::backend(&settings)?;
    let report = workflow::build(&settings, &backend)?;

    if json {
        return print_json(&report);
    }
    if report.built.is_empty() {
        println!("nothing to build for the {} profile", report.profile);
    } else {
        println!("built: {}", report.built.join(", "));
    }
    Ok(())
}

pub fn start(root: &Path, mode: &str, wait: bool, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let backend = super::backend(&settings)?;
    let interrupt = if wait {
        interrupt::install()
    } else {
        Interrupt::new()
    };
    let report = workflow::start(&settings, &backend, wait, &interrupt)?;

    if json {
        return print_json(&report);
    }
    if let Some(cert) = &report.certificate {
        print_certificate(cert);
        println!();
    }
    if let Some(health) = &report.health {
        print_health(health);
        println!();
    }
    println!(
        "{} stack '{}' started: {}",
        report.profile,
        report.project,
        report.services.join(", ")
    );
    print_urls(&report.urls);
    Ok(())
}

pub fn stop(root: &Path, mode: &str, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let backend = super::backend(&settings)?;
    workflow::stop(&backend)?;

    let project = settings.project_name();
    if json {
        return print_json(&serde_json::json!({ "project": project, "stopped": true }));
    }
    println!("stopped stack '{project}'");
    Ok(())
}

pub fn status(root: &Path, mode: &str, json: bool) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    let backend = super::backend(&settings)?;
    let report = workflow::status(&settings, &backend)?;

    if json {
        return print_json(&report);
    }
    print_health(&report);
    if !report.all_healthy() {
        println!();
        println!("not healthy: {}", report.describe_unhealthy());
    }
    Ok(())
}
