use std::path::Path;

use anyhow::{Context, Result};
use dicom::core::dictionary::DataDictionary;
use dicom::core::value::Value;
use dicom::core::Tag;
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::object::{open_file, DefaultDicomObject, InMemDicomObject};

use crate::dicom_access::ElementAccess;
use crate::models::{FileSummary, Metadata};

const PIXEL_DATA: Tag = tags::PIXEL_DATA;

/// Tag key in the `gggg|eeee` form used by ITK/GDCM metadata dictionaries.
pub fn tag_key(tag: Tag) -> String {
    format!("{:04x}|{:04x}", tag.group(), tag.element())
}

fn keyword(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .map(|e| e.alias.to_string())
        .unwrap_or_else(|| tag_key(tag))
}

fn ignored(tag: Tag, ignore_groups: &[String]) -> bool {
    let group = format!("{:04x}", tag.group());
    ignore_groups.iter().any(|g| g.eq_ignore_ascii_case(&group))
}

/// Collect the textual elements of `obj` under keys produced by `key_of`.
/// Pixel data, sequences and encapsulated fragments are left out.
fn collect<F>(obj: &InMemDicomObject, ignore_groups: &[String], key_of: F) -> Metadata
where
    F: Fn(Tag) -> String,
{
    let mut map = Metadata::new();
    for elem in obj.iter() {
        let tag = elem.header().tag;
        if tag == PIXEL_DATA || ignored(tag, ignore_groups) {
            continue;
        }
        if let Value::Primitive(value) = elem.value() {
            map.insert(key_of(tag), value.to_str().trim_end().to_string());
        }
    }
    map
}

/// Per-slice dictionary keyed `gggg|eeee`, as the grouped series backend reports it.
pub fn slice_tags(obj: &InMemDicomObject, ignore_groups: &[String]) -> Metadata {
    collect(obj, ignore_groups, tag_key)
}

/// Full attribute set keyed by dictionary keyword, as the per-file backend reports it.
pub fn attribute_set(obj: &InMemDicomObject, ignore_groups: &[String]) -> Metadata {
    collect(obj, ignore_groups, keyword)
}

pub fn summarize<T: ElementAccess>(obj: &T) -> FileSummary {
    FileSummary {
        patient_name: obj.element_str(tags::PATIENT_NAME),
        patient_id: obj.element_str(tags::PATIENT_ID),
        study_id: obj.element_str(tags::STUDY_ID),
        series_instance_uid: obj.series_uid(),
        modality: obj.element_str(tags::MODALITY),
        acquisition_time: obj.element_str(tags::ACQUISITION_TIME),
        rows: obj.element_i64(tags::ROWS).map(|v| v as u32),
        columns: obj.element_i64(tags::COLUMNS).map(|v| v as u32),
        has_pixel_data: obj.has_element(PIXEL_DATA),
    }
}

pub fn read_summary(path: &Path) -> Result<FileSummary> {
    let obj: DefaultDicomObject = open_file(path).context("Failed to open DICOM file")?;
    Ok(summarize(&obj))
}

pub fn print_info(path: &Path, json: bool) -> Result<()> {
    let summary = read_summary(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    let na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());

    println!("{}", "=".repeat(80));
    println!("DICOM File Information: {}", path.display());
    println!("{}", "=".repeat(80));
    println!("PATIENT");
    println!("  Name: {}", na(&summary.patient_name));
    println!("  ID:   {}", na(&summary.patient_id));
    println!("\nSTUDY");
    println!("  ID:     {}", na(&summary.study_id));
    println!("  Series: {}", na(&summary.series_instance_uid));
    println!("\nIMAGE");
    println!("  Modality:         {}", na(&summary.modality));
    println!("  Acquisition Time: {}", na(&summary.acquisition_time));
    if let (Some(rows), Some(columns)) = (summary.rows, summary.columns) {
        println!("  Size:             {}x{}", columns, rows);
    }
    println!(
        "  Pixel Data:       {}",
        if summary.has_pixel_data { "present" } else { "absent" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    fn sample() -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^Jane")));
        obj.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")));
        obj.put(DataElement::new(Tag(0x0029, 0x1010), VR::LO, PrimitiveValue::from("vendor")));
        obj.put(DataElement::new(PIXEL_DATA, VR::OB, PrimitiveValue::from(vec![1u8, 2, 3, 4])));
        obj
    }

    #[test]
    fn slice_tags_use_itk_keys_and_skip_pixels() {
        let dict = slice_tags(&sample(), &[]);
        assert_eq!(dict.get("0010|0010").map(String::as_str), Some("Doe^Jane"));
        assert_eq!(dict.get("0029|1010").map(String::as_str), Some("vendor"));
        assert!(!dict.contains_key("7fe0|0010"));
    }

    #[test]
    fn ignored_groups_are_dropped() {
        let dict = slice_tags(&sample(), &["0029".to_string()]);
        assert!(!dict.contains_key("0029|1010"));
        assert!(dict.contains_key("0008|0060"));
    }

    #[test]
    fn attribute_set_is_keyed_by_keyword() {
        let attrs = attribute_set(&sample(), &[]);
        assert_eq!(attrs.get("PatientName").map(String::as_str), Some("Doe^Jane"));
        assert_eq!(attrs.get("Modality").map(String::as_str), Some("MR"));
        assert!(!attrs.contains_key("PixelData"));
        // private tags have no keyword
        assert!(attrs.contains_key("0029|1010"));
    }

    #[test]
    fn summary_reads_identifying_fields() {
        let summary = summarize(&sample());
        assert_eq!(summary.patient_name.as_deref(), Some("Doe^Jane"));
        assert_eq!(summary.modality.as_deref(), Some("MR"));
        assert!(summary.has_pixel_data);
        assert_eq!(summary.rows, None);
    }

    #[test]
    fn summary_serializes_with_field_names() {
        let value = serde_json::to_value(summarize(&sample())).expect("serialize");
        assert_eq!(value["patient_name"], "Doe^Jane");
        assert_eq!(value["study_id"], serde_json::Value::Null);
        assert_eq!(value["has_pixel_data"], true);
    }
}
