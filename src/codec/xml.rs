//! XML side of the codec
//!
//! The wire schema is deliberately small: a `<todos>` root holding repeated
//! `<todo>` elements, or a single `<todo>`, each with `id`, `title`,
//! `doneStatus` and `description` text children. Other documents decode
//! generically (leaf text becomes a string, repeated names become arrays).

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use super::{CodecError, ContentType};

/// Roots whose children are always reported as an array, keyed by the root name
const COLLECTIONS: &[(&str, &str)] = &[
    ("todos", "todo"),
    ("errorMessages", "errorMessage"),
    ("challenges", "challenge"),
];

#[derive(Debug)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(start: &BytesStart<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            text: String::new(),
            children: Vec::new(),
        }
    }
}

pub(super) fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        CodecError::malformed(&ContentType::Xml, e.valid_up_to() as u64, "invalid UTF-8")
    })?;

    let root = parse_tree(text)?;
    Ok(canonical(root))
}

fn parse_tree(text: &str) -> Result<Element, CodecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let offset = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|e| CodecError::malformed(&ContentType::Xml, offset, e))?;

        match event {
            Event::Start(start) => stack.push(Element::new(&start)),
            Event::Empty(start) => attach(&mut stack, &mut root, Element::new(&start), offset)?,
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    CodecError::malformed(&ContentType::Xml, offset, "unexpected closing tag")
                })?;
                attach(&mut stack, &mut root, element, offset)?;
            }
            Event::Text(t) => {
                let content = t
                    .unescape()
                    .map_err(|e| CodecError::malformed(&ContentType::Xml, offset, e))?;
                match stack.last_mut() {
                    Some(top) => top.text.push_str(&content),
                    None if content.trim().is_empty() => {}
                    None => {
                        return Err(CodecError::malformed(
                            &ContentType::Xml,
                            offset,
                            "text outside of the root element",
                        ))
                    }
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let offset = reader.buffer_position() as u64;
    if let Some(open) = stack.last() {
        return Err(CodecError::malformed(
            &ContentType::Xml,
            offset,
            format!("unclosed element <{}>", open.name),
        ));
    }
    root.ok_or_else(|| CodecError::malformed(&ContentType::Xml, offset, "no root element"))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    offset: u64,
) -> Result<(), CodecError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(CodecError::malformed(
            &ContentType::Xml,
            offset,
            "multiple root elements",
        ));
    }
    *root = Some(element);
    Ok(())
}

/// Map an element tree onto the same shape the JSON API produces
fn canonical(root: Element) -> Value {
    if let Some((_, item)) = COLLECTIONS.iter().find(|(name, _)| *name == root.name) {
        let items: Vec<Value> = root
            .children
            .into_iter()
            .filter(|c| c.name == *item)
            .map(|c| if c.name == "todo" { todo(c) } else { generic(c) })
            .collect();
        let mut map = Map::new();
        map.insert(root.name, Value::Array(items));
        return Value::Object(map);
    }

    if root.name == "todo" {
        return todo(root);
    }
    generic(root)
}

fn todo(element: Element) -> Value {
    let mut fields = match generic(element) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let done = match fields.get("doneStatus") {
        Some(Value::String(s)) if s == "true" => Some(true),
        Some(Value::String(s)) if s == "false" => Some(false),
        _ => None,
    };
    if let Some(done) = done {
        fields.insert("doneStatus".into(), Value::Bool(done));
    }

    let id = match fields.get("id") {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    if let Some(id) = id {
        fields.insert("id".into(), Value::from(id));
    }
    Value::Object(fields)
}

fn generic(element: Element) -> Value {
    if element.children.is_empty() {
        return Value::String(element.text.trim().to_string());
    }

    let mut map = Map::new();
    for child in element.children {
        let name = child.name.clone();
        let value = generic(child);
        match map.remove(&name) {
            None => {
                map.insert(name, value);
            }
            Some(Value::Array(mut items)) => {
                items.push(value);
                map.insert(name, Value::Array(items));
            }
            Some(previous) => {
                map.insert(name, Value::Array(vec![previous, value]));
            }
        }
    }
    Value::Object(map)
}

pub(super) fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::new(Vec::new());

    match value {
        Value::Object(map) if map.len() == 1 && matches!(map.get("todos"), Some(Value::Array(_))) => {
            write_element(&mut writer, "todos", &map["todos"], Some("todo"))?
        }
        Value::Object(_) => write_element(&mut writer, "todo", value, None)?,
        Value::Array(_) => write_element(&mut writer, "todos", value, Some("todo"))?,
        _ => {
            return Err(CodecError::Encode {
                content_type: ContentType::Xml.to_string(),
                reason: "root value must be an object or an array".to_string(),
            })
        }
    }

    Ok(writer.into_inner())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &Value,
    item_name: Option<&str>,
) -> Result<(), CodecError> {
    emit(writer, Event::Start(BytesStart::new(name)))?;

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_element(writer, key, child, None)?;
            }
        }
        Value::Array(items) => {
            let item = item_name
                .map(str::to_string)
                .unwrap_or_else(|| name.strip_suffix('s').unwrap_or("item").to_string());
            for child in items {
                write_element(writer, &item, child, None)?;
            }
        }
        Value::Null => {}
        Value::String(s) => emit(writer, Event::Text(BytesText::new(s)))?,
        other => emit(writer, Event::Text(BytesText::new(&other.to_string())))?,
    }

    emit(writer, Event::End(BytesEnd::new(name)))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer.write_event(event).map_err(|e| CodecError::Encode {
        content_type: ContentType::Xml.to_string(),
        reason: e.to_string(),
    })
}
