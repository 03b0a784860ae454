//! XML-RPC wire codec.
//!
//! Encoding builds `<methodCall>` documents; decoding walks
//! `<methodResponse>` events with quick-xml. `<nil/>` is accepted and
//! emitted so None-valued scalars survive the round-trip.

use std::collections::BTreeMap;

use base64::Engine as _;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{RpcError, Value};

/// Encode a `<methodCall>` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut xml = String::with_capacity(256);
    xml.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    xml.push_str(&escape(method));
    xml.push_str("</methodName><params>");
    for param in params {
        xml.push_str("<param>");
        write_value(&mut xml, param);
        xml.push_str("</param>");
    }
    xml.push_str("</params></methodCall>");
    xml
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Nil => out.push_str("<nil/>"),
        Value::Bool(b) => {
            out.push_str("<boolean>");
            out.push(if *b { '1' } else { '0' });
            out.push_str("</boolean>");
        }
        Value::Int(n) => {
            out.push_str("<int>");
            out.push_str(&n.to_string());
            out.push_str("</int>");
        }
        Value::Double(d) => {
            out.push_str("<double>");
            out.push_str(&d.to_string());
            out.push_str("</double>");
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&base64::engine::general_purpose::STANDARD.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(map) => {
            out.push_str("<struct>");
            for (name, member) in map {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Decode a `<methodResponse>` document.
///
/// # Errors
///
/// Returns [`RpcError::Fault`] for `<fault>` responses and
/// [`RpcError::Decode`] for anything that is not valid XML-RPC.
pub fn decode_response(xml: &str) -> Result<Value, RpcError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"value" => return read_value(&mut reader),
                b"fault" => return Err(read_fault(&mut reader)?),
                _ => {}
            },
            Ok(Event::Eof) => {
                return Err(RpcError::Decode("response contains no value".into()))
            }
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

/// Read the contents of a `<value>` element whose start tag was consumed.
fn read_value(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut result: Option<Value> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                if result.is_none() {
                    let text = t
                        .unescape()
                        .map_err(|e| RpcError::Decode(e.to_string()))?
                        .into_owned();
                    result = Some(Value::String(text));
                }
            }
            Ok(Event::Start(e)) => {
                let scalar = match e.name().as_ref() {
                    b"string" => Value::String(read_text(reader, b"string")?),
                    b"int" | b"i4" | b"i8" => {
                        let text = read_text(reader, e.name().as_ref())?;
                        Value::Int(text.trim().parse().map_err(|_| {
                            RpcError::Decode(format!("invalid integer: {text}"))
                        })?)
                    }
                    b"boolean" => {
                        let text = read_text(reader, b"boolean")?;
                        Value::Bool(matches!(text.trim(), "1" | "true"))
                    }
                    b"double" => {
                        let text = read_text(reader, b"double")?;
                        Value::Double(text.trim().parse().map_err(|_| {
                            RpcError::Decode(format!("invalid double: {text}"))
                        })?)
                    }
                    b"dateTime.iso8601" => Value::DateTime(read_text(reader, b"dateTime.iso8601")?),
                    b"base64" => {
                        let text = read_text(reader, b"base64")?;
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(text.trim())
                            .map_err(|e| RpcError::Decode(format!("invalid base64: {e}")))?;
                        Value::Base64(bytes)
                    }
                    b"nil" => {
                        skip_to_end(reader, b"nil")?;
                        Value::Nil
                    }
                    b"array" => read_array(reader)?,
                    b"struct" => read_struct(reader)?,
                    other => {
                        return Err(RpcError::Decode(format!(
                            "unexpected element <{}> inside value",
                            String::from_utf8_lossy(other)
                        )))
                    }
                };
                result = Some(scalar);
            }
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"nil" => result = Some(Value::Nil),
                b"string" => result = Some(Value::String(String::new())),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"value" => {
                // An untyped empty <value></value> decodes as empty string.
                return Ok(result.unwrap_or_else(|| Value::String(String::new())));
            }
            Ok(Event::Eof) => return Err(RpcError::Decode("unexpected end of document".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

fn read_array(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"value" => {
                items.push(read_value(reader)?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"array" => {
                return Ok(Value::Array(items))
            }
            Ok(Event::Eof) => return Err(RpcError::Decode("unterminated array".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

fn read_struct(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut map = BTreeMap::new();
    let mut name: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"name" => name = Some(read_text(reader, b"name")?),
                b"value" => {
                    let value = read_value(reader)?;
                    let key = name.take().ok_or_else(|| {
                        RpcError::Decode("struct member value before name".into())
                    })?;
                    map.insert(key, value);
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"struct" => {
                return Ok(Value::Struct(map))
            }
            Ok(Event::Eof) => return Err(RpcError::Decode("unterminated struct".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

fn read_fault(reader: &mut Reader<&[u8]>) -> Result<RpcError, RpcError> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"value" => {
                let value = read_value(reader)?;
                let map = value.as_struct().cloned().unwrap_or_default();
                let code = map
                    .get("faultCode")
                    .and_then(Value::as_i64)
                    .unwrap_or_default() as i32;
                let message = map
                    .get("faultString")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown fault")
                    .to_string();
                return Ok(RpcError::Fault { code, message });
            }
            Ok(Event::Eof) => return Err(RpcError::Decode("unterminated fault".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

/// Collect text content up to the named end tag.
fn read_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, RpcError> {
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                text.push_str(&t.unescape().map_err(|e| RpcError::Decode(e.to_string()))?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == end => return Ok(text),
            Ok(Event::Eof) => return Err(RpcError::Decode("unterminated element".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}

fn skip_to_end(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<(), RpcError> {
    loop {
        match reader.read_event() {
            Ok(Event::End(e)) if e.name().as_ref() == end => return Ok(()),
            Ok(Event::Eof) => return Err(RpcError::Decode("unterminated element".into())),
            Err(e) => return Err(RpcError::Decode(e.to_string())),
            _ => {}
        }
    }
}
