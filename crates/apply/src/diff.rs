use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use yard_core::{ObjectError, ResourceObject};

/// Annotation carrying the canonical form of the last applied desired state.
pub const LAST_APPLIED_ANNOTATION: &str = "yard.banzaicloud.io/last-applied";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

/// Drops server-populated fields and the fingerprint itself.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for f in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid", "selfLink", "deletionTimestamp"] {
            meta.remove(f);
        }
        if let Some(annos) = meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            annos.remove(LAST_APPLIED_ANNOTATION);
            if annos.is_empty() { meta.remove("annotations"); }
        }
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(v: &Json) -> String {
    fn write(v: &Json, out: &mut String) {
        match v {
            Json::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, k) in keys.into_iter().enumerate() {
                    if i > 0 { out.push(','); }
                    out.push_str(&Json::String(k.clone()).to_string());
                    out.push(':');
                    write(&map[k], out);
                }
                out.push('}');
            }
            Json::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { out.push(','); }
                    write(item, out);
                }
                out.push(']');
            }
            scalar => out.push_str(&scalar.to_string()),
        }
    }
    let mut out = String::new();
    write(v, &mut out);
    out
}

pub fn fingerprint(obj: &ResourceObject) -> String {
    canonical_json(&strip_noisy(obj.raw().clone()))
}

pub fn stamp_last_applied(obj: &mut ResourceObject) -> Result<(), ObjectError> {
    let fp = fingerprint(obj);
    obj.set_annotation(LAST_APPLIED_ANNOTATION, fp)
}

/// Parsed fingerprint of a stored object, if it carries a readable one.
pub fn last_applied(stored: &ResourceObject) -> Option<Json> {
    serde_json::from_str(stored.annotation(LAST_APPLIED_ANNOTATION)?).ok()
}

/// Changes needed to move `stored` to `desired`.
///
/// Only fields set in `desired` are compared, so values the server defaulted
/// are not changes. Removals are fields recorded in `last_applied` that are no
/// longer desired but are still present in `stored`.
pub fn three_way_diff(last_applied: Option<&Json>, desired: &Json, stored: &Json) -> DiffSummary {
    let desired = strip_noisy(desired.clone());
    let stored = strip_noisy(stored.clone());
    let mut sum = DiffSummary::default();
    compare(&desired, &stored, &mut sum);
    if let Some(last) = last_applied {
        removed(&strip_noisy(last.clone()), &desired, &stored, &mut sum);
    }
    sum
}

fn compare(want: &Json, have: &Json, sum: &mut DiffSummary) {
    match (want, have) {
        (Json::Object(w), Json::Object(h)) => {
            for (k, wv) in w {
                match h.get(k) {
                    Some(hv) if hv == wv => {}
                    Some(hv) => compare(wv, hv, sum),
                    // an explicit null asks for absence
                    None if wv.is_null() => {}
                    None => sum.adds += 1,
                }
            }
        }
        (Json::Array(w), Json::Array(h)) if w.len() == h.len() => {
            for (wv, hv) in w.iter().zip(h) {
                if wv != hv { compare(wv, hv, sum); }
            }
        }
        (w, h) => { if w != h { sum.updates += 1; } }
    }
}

fn removed(last: &Json, want: &Json, have: &Json, sum: &mut DiffSummary) {
    let (Json::Object(l), Json::Object(h)) = (last, have) else { return };
    for (k, lv) in l {
        let Some(hv) = h.get(k) else { continue };
        match want.get(k) {
            None => sum.removes += 1,
            Some(wv) => removed(lv, wv, hv, sum),
        }
    }
}
