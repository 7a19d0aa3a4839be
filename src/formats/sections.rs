use csv::StringRecord;
use log::trace;

use crate::core::GenericResult;

/// One named section of a multi-section statement: the field names from its
/// header row plus its data rows in source order.
pub struct Section {
    pub name: String,
    pub fields: Vec<String>,
    pub rows: Vec<StringRecord>,
}

// Rows are shaped as (section name, row kind, values...). Header rows carry
// the field names, Total/SubTotal rows carry aggregates we recompute
// ourselves anyway.
const ROW_KIND_HEADER: &str = "Header";
const ROW_KIND_DATA: &str = "Data";
const SKIPPED_ROW_KINDS: &[&str] = &["Total", "SubTotal", "Notes"];

/// Offset of the first value column after the (section, kind) prefix.
pub const VALUE_OFFSET: usize = 2;

/// Partitions statement rows into named sections, preserving row order
/// within each section. A section header re-emitted mid-file (some export
/// tools do this on page boundaries) continues the already-open section.
pub fn split(records: &[StringRecord]) -> GenericResult<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();

    for record in records {
        if record.len() < VALUE_OFFSET {
            return Err!("Invalid statement record: {:?}", record);
        }

        let name = record.get(0).unwrap();
        let kind = record.get(1).unwrap();

        if kind == ROW_KIND_HEADER {
            let fields: Vec<String> = record.iter()
                .skip(VALUE_OFFSET)
                .map(|field| field.trim().to_owned())
                .collect();

            match sections.iter_mut().find(|section| section.name == name) {
                Some(section) => {
                    trace!("Got a re-emitted {:?} section header.", name);
                    section.fields = fields;
                },
                None => sections.push(Section {
                    name: name.to_owned(),
                    fields,
                    rows: Vec::new(),
                }),
            };
        } else if kind == ROW_KIND_DATA {
            let section = sections.iter_mut()
                .find(|section| section.name == name)
                .ok_or_else(|| format!(
                    "Got a {:?} data row before the section header", name))?;
            section.rows.push(record.clone());
        } else if SKIPPED_ROW_KINDS.contains(&kind) {
            trace!("Skipping {:?} row of {:?} section.", kind, name);
        } else {
            return Err!("Got an unexpected {:?} row kind in {:?} section", kind, name);
        }
    }

    Ok(sections)
}
