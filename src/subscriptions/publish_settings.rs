//! Subscription XML formats.
//!
//! Two documents describe subscriptions: the publish-settings file imported
//! for certificate mode (attributes on `<Subscription>`), and the management
//! API's subscription listing used in Active Directory mode (child elements).
//! Both parse into [`Subscription`].

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use roxmltree::{Document, Node};
use uuid::Uuid;

use super::Subscription;
use crate::auth::SecureString;
use crate::error::ApiError;

fn is_element(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child_text(node: &Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|child| is_element(child, name))
        .and_then(|child| child.text())
        .map(|text| text.trim().to_string())
}

fn parse_id(value: Option<&str>) -> Result<Uuid, ApiError> {
    let value = value.ok_or_else(|| ApiError::Parse("Subscription is missing its id".into()))?;
    Uuid::parse_str(value.trim())
        .map_err(|e| ApiError::Parse(format!("Invalid subscription id '{}': {}", value, e)))
}

/// Parse a publish-settings document.
///
/// A missing `Selected` attribute means selected. The management certificate
/// falls back to the one on `<PublishProfile>` used by the older layout.
pub fn parse_publish_settings(xml: &str) -> Result<Vec<Subscription>, ApiError> {
    let doc = Document::parse(xml)?;

    let profile_certificate = doc
        .descendants()
        .find(|n| is_element(n, "PublishProfile"))
        .and_then(|n| n.attribute("ManagementCertificate"))
        .filter(|c| !c.trim().is_empty());

    let profile_url = doc
        .descendants()
        .find(|n| is_element(n, "PublishProfile"))
        .and_then(|n| n.attribute("Url"));

    doc.descendants()
        .filter(|n| is_element(n, "Subscription"))
        .map(|node| -> Result<Subscription, ApiError> {
            let certificate = node
                .attribute("ManagementCertificate")
                .filter(|c| !c.trim().is_empty())
                .or(profile_certificate);

            Ok(Subscription {
                id: parse_id(node.attribute("Id"))?,
                name: node.attribute("Name").unwrap_or_default().to_string(),
                tenant_id: String::new(),
                selected: node.attribute("Selected").map_or(true, |s| s == "true"),
                management_certificate: certificate.map(SecureString::from),
                service_management_url: node
                    .attribute("ServiceManagementUrl")
                    .or(profile_url)
                    .map(str::to_string),
            })
        })
        .collect()
}

/// Parse the management API's `<Subscriptions>` listing.
///
/// Every entry starts unselected; the registry applies the stored selection.
pub fn parse_subscription_listing(xml: &str) -> Result<Vec<Subscription>, ApiError> {
    let doc = Document::parse(xml)?;

    doc.descendants()
        .filter(|n| is_element(n, "Subscription"))
        .map(|node| -> Result<Subscription, ApiError> {
            Ok(Subscription {
                id: parse_id(child_text(&node, "SubscriptionID").as_deref())?,
                name: child_text(&node, "SubscriptionName").unwrap_or_default(),
                tenant_id: child_text(&node, "AADTenantID").unwrap_or_default(),
                selected: false,
                management_certificate: None,
                service_management_url: None,
            })
        })
        .collect()
}

/// The base64 management certificate stored for `subscription_id`, if any.
pub fn certificate_for(xml: &str, subscription_id: &str) -> Result<Option<SecureString>, ApiError> {
    let wanted = parse_id(Some(subscription_id))?;
    Ok(parse_publish_settings(xml)?
        .into_iter()
        .find(|s| s.id == wanted)
        .and_then(|s| s.management_certificate))
}

fn xml_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::Parse(format!("Failed to rewrite subscription XML: {}", e))
}

/// Rebuild a `<Subscription>` start tag with `Selected` set from `selected`.
///
/// Elements without an `Id` attribute are returned unchanged.
fn with_selection<'a>(element: &BytesStart<'a>, selected: &[Uuid]) -> Result<BytesStart<'a>, ApiError> {
    let mut id = None;
    let mut kept = Vec::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        match attribute.key.as_ref() {
            b"Selected" => {}
            key => {
                if key == b"Id" {
                    id = Some(attribute.unescape_value().map_err(xml_error)?.into_owned());
                }
                kept.push(attribute);
            }
        }
    }

    let Some(id) = id else {
        return Ok(element.clone());
    };
    let is_selected = selected.contains(&parse_id(Some(id.as_str()))?);

    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut rebuilt = BytesStart::new(Cow::Owned(name));
    for attribute in kept {
        rebuilt.push_attribute(attribute);
    }
    rebuilt.push_attribute(("Selected", if is_selected { "true" } else { "false" }));
    Ok(rebuilt.into_owned())
}

/// Rewrite the `Selected` attribute of every subscription in a publish-settings
/// document, leaving the rest of the document as it was.
pub fn rewrite_selection(xml: &str, selected: &[Uuid]) -> Result<String, ApiError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        let event = match event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"Subscription" => {
                Event::Start(with_selection(&e, selected)?)
            }
            Event::Empty(e) if e.local_name().as_ref() == b"Subscription" => {
                Event::Empty(with_selection(&e, selected)?)
            }
            other => other,
        };
        writer.write_event(event).map_err(xml_error)?;
    }

    String::from_utf8(writer.into_inner()).map_err(xml_error)
}
