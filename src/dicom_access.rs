use chrono::NaiveTime;
use dicom::core::value::AsRange;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

/// Small helper trait to pull typed values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>>;
    fn element_i64(&self, tag: Tag) -> Option<i64>;
    fn element_time(&self, tag: Tag) -> Option<NaiveTime>;
    fn has_element(&self, tag: Tag) -> bool;

    fn series_uid(&self) -> Option<String> {
        self.element_str(tags::SERIES_INSTANCE_UID)
    }

    /// Z component of ImagePositionPatient.
    fn slice_position(&self) -> Option<f64> {
        self.element_f64s(tags::IMAGE_POSITION_PATIENT)
            .and_then(|pos| pos.get(2).copied())
    }

    fn instance_number(&self) -> Option<i64> {
        self.element_i64(tags::INSTANCE_NUMBER)
    }

    fn acquisition_time(&self) -> Option<NaiveTime> {
        self.element_time(tags::ACQUISITION_TIME)
    }
}

impl ElementAccess for InMemDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
    }

    fn element_i64(&self, tag: Tag) -> Option<i64> {
        self.element(tag).ok().and_then(|e| e.to_int::<i64>().ok())
    }

    /// Partial TM values (`HH`, `HHMM`) resolve to the start of the range they cover.
    fn element_time(&self, tag: Tag) -> Option<NaiveTime> {
        self.element(tag).ok()?.to_time().ok()?.earliest().ok()
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        (**self).element_f64s(tag)
    }

    fn element_i64(&self, tag: Tag) -> Option<i64> {
        (**self).element_i64(tag)
    }

    fn element_time(&self, tag: Tag) -> Option<NaiveTime> {
        (**self).element_time(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        (**self).has_element(tag)
    }
}
