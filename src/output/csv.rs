use anyhow::{Result, anyhow};

use crate::engine::result::ComparisonResult;

/// One row per result: `id`, `status`, `rowKey`, then one column per mapped
/// field holding `source => target` where the values disagree.
pub fn results_to_csv(columns: &[String], results: &[ComparisonResult]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut headers = vec!["id".to_string(), "status".to_string(), "rowKey".to_string()];
    headers.extend(columns.iter().cloned());
    writer.write_record(&headers)?;

    for result in results {
        let mut record = vec![
            result.id.to_string(),
            result.status.as_str().to_string(),
            result.row_key_display(),
        ];
        for column in columns {
            let cell = result
                .difference(column)
                .map(|diff| {
                    format!(
                        "{} => {}",
                        diff.source_value.display(),
                        diff.target_value.display()
                    )
                })
                .unwrap_or_default();
            record.push(cell);
        }
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush CSV export: {}", err))
}
