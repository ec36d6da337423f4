use serde::Serialize;
use stackctl_core::certs::CertificateRecord;
use stackctl_core::health::HealthReport;
use stackctl_core::workflow::ServiceUrl;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(line(rule.iter().map(String::as_str).collect()));
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", format_table(headers, rows));
}

pub fn print_health(report: &HealthReport) {
    let rows: Vec<Vec<String>> = report
        .services
        .iter()
        .map(|s| {
            vec![
                s.service.clone(),
                s.status.to_string(),
                s.state.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["SERVICE", "HEALTH", "STATE"], &rows);
}

pub fn print_urls(urls: &[ServiceUrl]) {
    for u in urls {
        println!("  {:<8} {}", u.name, u.url);
    }
}

pub fn print_certificate(record: &CertificateRecord) {
    let days_left = record.days_left(chrono::Utc::now());
    println!(
        "certificate {} for {} (expires {}, {days_left} days left)",
        record.action.as_str(),
        record.common_name,
        record.not_after.format("%Y-%m-%d"),
    );
    println!("  cert: {}", record.cert_path.display());
    println!("  key:  {}", record.key_path.display());
}
