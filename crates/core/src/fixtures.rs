//! Tiny PDFs built with lopdf for extractor and pipeline tests.

use lopdf::content::{Content, Operation};
use lopdf::encryption::{decrypt_object, get_encryption_key};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

// Standard security handler padding string.
const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

#[derive(Debug, Clone, Default)]
pub(crate) struct PdfFixture {
    pages: Vec<String>,
    info: Vec<(String, String)>,
    user_password: Option<String>,
}

impl PdfFixture {
    pub(crate) fn pages(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|page| page.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_info(mut self, key: &str, value: &str) -> Self {
        self.info.push((key.to_string(), value.to_string()));
        self
    }

    /// RC4 40-bit (V1/R2) encryption under `user_password`.
    pub(crate) fn encrypted_with(mut self, user_password: &str) -> Self {
        self.user_password = Some(user_password.to_string());
        self
    }
}

/// Each `\n`-separated line of a page becomes its own text object so the
/// extracted text keeps the line breaks; an empty page gets an empty stream.
pub(crate) fn pdf_bytes(fixture: &PdfFixture) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in &fixture.pages {
        let mut operations = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let baseline = 720 - 14 * line_no as i64;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), Object::Integer(baseline)]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let encoded = content.encode().expect("fixture content encodes");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(fixture.pages.len() as i64),
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info_id = None;
    if !fixture.info.is_empty() {
        let mut info = lopdf::Dictionary::new();
        for (key, value) in &fixture.info {
            info.set(key.as_str(), Object::string_literal(value.as_str()));
        }
        let id = doc.add_object(info);
        doc.trailer.set("Info", id);
        info_id = Some(id);
    }

    if let Some(password) = &fixture.user_password {
        encrypt(&mut doc, password, info_id);
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture pdf serializes");
    bytes
}

fn encrypt(doc: &mut Document, user_password: &str, info_id: Option<ObjectId>) {
    let file_id = Object::String(b"pdf-chunk-fixture".to_vec(), StringFormat::Hexadecimal);
    doc.trailer.set("ID", vec![file_id.clone(), file_id]);
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "P" => -4,
        "O" => Object::String(vec![0x5A; 32], StringFormat::Hexadecimal),
    });
    doc.trailer.set("Encrypt", encrypt_id);

    let key = get_encryption_key(doc, user_password, false).expect("fixture encryption key");
    let user_check = rc4(&key, &PASSWORD_PADDING);
    doc.get_object_mut(encrypt_id)
        .and_then(Object::as_dict_mut)
        .expect("encryption dictionary")
        .set("U", Object::String(user_check, StringFormat::Hexadecimal));

    // RC4 is symmetric, so lopdf's per-object decryption also encrypts.
    for (&id, object) in doc.objects.iter_mut() {
        if id == encrypt_id {
            continue;
        }
        if let Ok(cipher) = decrypt_object(&key, id, object) {
            match object {
                Object::Stream(stream) => stream.set_content(cipher),
                Object::String(bytes, _) => *bytes = cipher,
                _ => {}
            }
        }
    }

    if let Some(info_id) = info_id {
        let info = doc
            .get_object_mut(info_id)
            .and_then(Object::as_dict_mut)
            .expect("info dictionary");
        for (_, value) in info.iter_mut() {
            if let Ok(cipher) = decrypt_object(&key, info_id, value) {
                if let Object::String(bytes, _) = value {
                    *bytes = cipher;
                }
            }
        }
    }
}

fn rc4(key: &[u8], input: &[u8]) -> Vec<u8> {
    let mut state: Vec<u8> = (0..=255).collect();
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }

    let (mut i, mut j) = (0u8, 0u8);
    input
        .iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            byte ^ state[state[i as usize].wrapping_add(state[j as usize]) as usize]
        })
        .collect()
}
