// ============================================================================
// DOCUMENT METADATA: well-known fields plus open exif / xmp / iptc maps
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Timestamp layout used by EXIF `DateTime` fields.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Keys whose values are nested maps merged key-by-key instead of replaced.
pub const NESTED_KEYS: [&str; 3] = ["exif", "xmp", "iptc"];

/// Descriptive data stored in the project header.
///
/// Unknown top-level keys survive a load/save cycle through `extra`. So do
/// well-known keys holding a value of the wrong type when read from a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Last modification time, refreshed on every save.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    /// Creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_original: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_resolution: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_resolution: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_space: Option<String>,
    /// Source path when the document was imported from a plain image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    /// Dot-prefixed lowercase extension of the imported file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_format: Option<String>,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub exif: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub xmp: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub iptc: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pull `key` out of `map` as a `T`. `null` reads as absent. A value of the
/// wrong type is an error for keys listed in `strict`, otherwise it moves
/// to `extra`.
fn take<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    extra: &mut Map<String, Value>,
    key: &str,
    strict: &[String],
) -> Result<Option<T>, serde_json::Error> {
    let Some(value) = map.remove(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value.clone()) {
        Ok(v) => Ok(Some(v)),
        Err(e) if strict.iter().any(|k| k == key) => Err(e),
        Err(e) => {
            log::warn!("metadata: '{key}' kept as-is ({e})");
            extra.insert(key.to_string(), value);
            Ok(None)
        }
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Metadata::from_map(map, &[]).map_err(serde::de::Error::custom)
    }
}

impl Metadata {
    /// Build from a JSON object. See [`take`] for how `strict` treats
    /// mistyped well-known keys; whatever is left over lands in `extra`.
    fn from_map(mut map: Map<String, Value>, strict: &[String]) -> Result<Self, serde_json::Error> {
        let mut extra = Map::new();
        let m = &mut map;
        let x = &mut extra;
        let mut meta = Self {
            title: take(m, x, "title", strict)?,
            author: take(m, x, "author", strict)?,
            comment: take(m, x, "comment", strict)?,
            datetime: take(m, x, "datetime", strict)?,
            datetime_original: take(m, x, "datetime_original", strict)?,
            width: take(m, x, "width", strict)?,
            height: take(m, x, "height", strict)?,
            x_resolution: take(m, x, "x_resolution", strict)?,
            y_resolution: take(m, x, "y_resolution", strict)?,
            resolution_unit: take(m, x, "resolution_unit", strict)?,
            color_space: take(m, x, "color_space", strict)?,
            created_from: take(m, x, "created_from", strict)?,
            original_format: take(m, x, "original_format", strict)?,
            exif: take(m, x, "exif", strict)?.unwrap_or_default(),
            xmp: take(m, x, "xmp", strict)?.unwrap_or_default(),
            iptc: take(m, x, "iptc", strict)?.unwrap_or_default(),
            extra: Map::new(),
        };
        extra.extend(map);
        meta.extra = extra;
        Ok(meta)
    }

    /// Metadata for a freshly created document.
    pub fn for_new_document(width: u32, height: u32) -> Self {
        let now = now_exif();
        Self {
            datetime: Some(now.clone()),
            datetime_original: Some(now),
            width: Some(width),
            height: Some(height),
            x_resolution: Some(300.0),
            y_resolution: Some(300.0),
            resolution_unit: Some("pixels/in".to_string()),
            color_space: Some("sRGB".to_string()),
            ..Self::default()
        }
    }

    /// Merge a partial update.
    ///
    /// Top-level keys overwrite. `exif`, `xmp` and `iptc` objects are merged
    /// shallowly: existing keys survive unless the update names them.
    /// On error `self` is left untouched.
    pub fn merge(&mut self, partial: Map<String, Value>) -> Result<(), serde_json::Error> {
        let touched: Vec<String> = partial.keys().cloned().collect();
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for (key, value) in partial {
            match value {
                Value::Object(update) if NESTED_KEYS.contains(&key.as_str()) => {
                    let slot = current
                        .entry(key)
                        .or_insert_with(|| Value::Object(Map::new()));
                    match slot {
                        Value::Object(existing) => existing.extend(update),
                        other => *other = Value::Object(update),
                    }
                }
                value => {
                    current.insert(key, value);
                }
            }
        }

        *self = Self::from_map(current, &touched)?;
        Ok(())
    }

    /// Refresh the last-modified timestamp, filling in the creation time if absent.
    pub fn touch_datetime(&mut self) {
        let now = now_exif();
        if self.datetime_original.is_none() {
            self.datetime_original = Some(now.clone());
        }
        self.datetime = Some(now);
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn now_exif() -> String {
    chrono::Local::now().format(EXIF_DATETIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn scalar_keys_overwrite() {
        let mut meta = Metadata::default();
        meta.title = Some("old".into());
        meta.merge(as_map(json!({ "title": "new", "author": "someone" }))).unwrap();
        assert_eq!(meta.title.as_deref(), Some("new"));
        assert_eq!(meta.author.as_deref(), Some("someone"));
    }

    #[test]
    fn nested_maps_merge_shallowly() {
        let mut meta = Metadata::default();
        meta.exif.insert("Exif.Image.Make".into(), json!("Acme"));
        meta.exif.insert("Exif.Image.Model".into(), json!("X1"));

        meta.merge(as_map(json!({
            "exif": { "Exif.Image.Model": "X2", "Exif.Photo.ISO": 200 }
        })))
        .unwrap();

        assert_eq!(meta.exif["Exif.Image.Make"], json!("Acme"));
        assert_eq!(meta.exif["Exif.Image.Model"], json!("X2"));
        assert_eq!(meta.exif["Exif.Photo.ISO"], json!(200));
    }

    #[test]
    fn unknown_keys_are_kept() {
        let mut meta = Metadata::default();
        meta.merge(as_map(json!({ "software": "EpiGimp" }))).unwrap();
        assert_eq!(meta.extra["software"], json!("EpiGimp"));

        let bytes = meta.to_json_bytes().unwrap();
        let back: Metadata = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn bad_merge_leaves_metadata_untouched() {
        let mut meta = Metadata::for_new_document(10, 20);
        let before = meta.clone();
        assert!(meta.merge(as_map(json!({ "width": "wide" }))).is_err());
        assert_eq!(meta, before);
    }

    #[test]
    fn mistyped_fields_load_without_failing() {
        let meta: Metadata = serde_json::from_value(json!({
            "title": "scan",
            "x_resolution": "300",
            "width": 40,
            "exif": null,
            "iptc": "none",
            "software": "other editor"
        }))
        .unwrap();
        assert_eq!(meta.title.as_deref(), Some("scan"));
        assert_eq!(meta.width, Some(40));
        assert_eq!(meta.x_resolution, None);
        assert!(meta.exif.is_empty() && meta.iptc.is_empty());
        assert_eq!(meta.extra["x_resolution"], json!("300"));
        assert_eq!(meta.extra["iptc"], json!("none"));
        assert_eq!(meta.extra["software"], json!("other editor"));

        // the odd values are written back unchanged
        let back: Value = serde_json::from_slice(&meta.to_json_bytes().unwrap()).unwrap();
        assert_eq!(back["x_resolution"], json!("300"));
    }

    #[test]
    fn merge_after_lenient_load_still_works() {
        let mut meta: Metadata = serde_json::from_value(json!({ "x_resolution": "300" })).unwrap();
        meta.merge(as_map(json!({ "title": "ok" }))).unwrap();
        assert_eq!(meta.title.as_deref(), Some("ok"));
        meta.merge(as_map(json!({ "x_resolution": 72.0 }))).unwrap();
        assert_eq!(meta.x_resolution, Some(72.0));
        assert!(!meta.extra.contains_key("x_resolution"));
    }

    #[test]
    fn touch_sets_both_timestamps() {
        let mut meta = Metadata::default();
        meta.touch_datetime();
        assert!(meta.datetime.is_some());
        assert_eq!(meta.datetime, meta.datetime_original);
    }
}
