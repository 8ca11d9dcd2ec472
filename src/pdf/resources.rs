use lopdf::{Dictionary, Object, ObjectId};

use super::content::CAPTION_FONT_RESOURCE;

/// Build a page's resources dictionary from the caption font and XObjects.
///
/// The page draws one image and one line of text, so `ProcSet` lists
/// exactly the operator groups those need.
pub fn page_resources(font_id: ObjectId, xobject_dict: &Dictionary) -> Dictionary {
    let mut font_resources = Dictionary::new();
    font_resources.set(CAPTION_FONT_RESOURCE, Object::Reference(font_id));

    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(font_resources));
    if !xobject_dict.is_empty() {
        let mut xobject_resources = Dictionary::new();
        for (key, value) in xobject_dict.iter() {
            xobject_resources.set(key.to_vec(), value.clone());
        }
        resources.set("XObject", Object::Dictionary(xobject_resources));
    }
    resources.set(
        "ProcSet",
        vec![
            Object::Name(b"PDF".to_vec()),
            Object::Name(b"Text".to_vec()),
            Object::Name(b"ImageC".to_vec()),
        ],
    );
    resources
}
