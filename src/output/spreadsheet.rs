//! Excel export as a SpreadsheetML 2003 workbook.
//!
//! The workbook carries the same columns as the CSV export. Only the
//! `Created` document property changes between exports of the same results.

use chrono::Utc;

use crate::engine::result::ComparisonResult;

pub fn results_to_workbook(columns: &[String], results: &[ComparisonResult]) -> Vec<u8> {
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
    xml.push_str(
        "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:o=\"urn:schemas-microsoft-com:office:office\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
    );
    xml.push_str(&format!(
        " <o:DocumentProperties><o:Created>{}</o:Created></o:DocumentProperties>\n",
        created
    ));
    xml.push_str(" <Worksheet ss:Name=\"Comparison\">\n  <Table>\n");

    let mut header = vec!["id", "status", "rowKey"];
    header.extend(columns.iter().map(String::as_str));
    push_row(&mut xml, header.iter().map(|h| Cell::Text(h)));

    for result in results {
        let key = result.row_key_display();
        let mut cells = vec![
            Cell::Number(result.id),
            Cell::Text(result.status.as_str()),
            Cell::Owned(key),
        ];
        for column in columns {
            let text = result
                .difference(column)
                .map(|diff| {
                    format!(
                        "{} => {}",
                        diff.source_value.display(),
                        diff.target_value.display()
                    )
                })
                .unwrap_or_default();
            cells.push(Cell::Owned(text));
        }
        push_row(&mut xml, cells.into_iter());
    }

    xml.push_str("  </Table>\n </Worksheet>\n</Workbook>\n");
    xml.into_bytes()
}

enum Cell<'a> {
    Text(&'a str),
    Owned(String),
    Number(u64),
}

fn push_row<'a>(xml: &mut String, cells: impl Iterator<Item = Cell<'a>>) {
    xml.push_str("   <Row>");
    for cell in cells {
        match cell {
            Cell::Number(n) => {
                xml.push_str(&format!("<Cell><Data ss:Type=\"Number\">{}</Data></Cell>", n))
            }
            Cell::Text(text) => push_string_cell(xml, text),
            Cell::Owned(text) => push_string_cell(xml, &text),
        }
    }
    xml.push_str("</Row>\n");
}

fn push_string_cell(xml: &mut String, text: &str) {
    xml.push_str("<Cell><Data ss:Type=\"String\">");
    xml.push_str(&escape(text));
    xml.push_str("</Data></Cell>");
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            // Other C0 controls are illegal in XML 1.0 even as references.
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02X}", c as u32)),
            c if c.is_control() => out.push_str(&format!("&#{};", c as u32)),
            c => out.push(c),
        }
    }
    out
}
