//! AWS Route53 DNS client. Requests are XML and signed with SigV4.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::escape::{partial_escape, unescape};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::dns::propagation::{verify_txt, TxtResolver};
use crate::dns::sigv4::{authorization, CanonicalRequest, SigningParams};
use crate::dns::{extract_root_domain, DnsCredentials, DnsProvider, ProviderContext, RECORD_TTL};
use crate::errors::PlaneError;
use crate::http::client::{Auth, RestClient, RestResponse};

const API_BASE: &str = "https://route53.amazonaws.com";
const API_VERSION: &str = "2013-04-01";
const XML_NAMESPACE: &str = "https://route53.amazonaws.com/doc/2013-04-01/";
const DEFAULT_REGION: &str = "us-east-1";
/// Route53 is a global service: the endpoint only accepts this credential scope
const SIGNING_REGION: &str = "us-east-1";

/// Record set change action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Upsert,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Upsert => "UPSERT",
            ChangeAction::Delete => "DELETE",
        }
    }
}

/// One entry of a `ListHostedZones` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
}

impl HostedZone {
    /// `/hostedzone/Z123` -> `Z123`
    pub fn short_id(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

#[derive(Debug)]
pub struct Route53Provider {
    client: RestClient,
    host: String,
    access_key_id: SecretString,
    secret_access_key: SecretString,
    /// Region as configured, reported but not used for signing
    region: String,
    hosted_zone_id: Option<String>,
    zones: Mutex<HashMap<String, String>>,
    resolver: Arc<dyn TxtResolver>,
}

impl Route53Provider {
    pub fn new(credentials: &DnsCredentials, context: &ProviderContext) -> Result<Self, PlaneError> {
        let access_key_id = credentials.require("route53", "access_key_id")?;
        let secret_access_key = credentials.require("route53", "secret_access_key")?;

        let base_url = context.base_url_or(API_BASE);
        let url = url::Url::parse(base_url)
            .map_err(|e| PlaneError::ConfigError(format!("Invalid Route53 endpoint {}: {}", base_url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(PlaneError::ConfigError(format!(
                    "Route53 endpoint has no host: {}",
                    base_url
                )))
            }
        };

        Ok(Self {
            client: RestClient::new(base_url, context.http_timeout, Auth::None)?,
            host,
            access_key_id,
            secret_access_key,
            region: credentials.get("region").unwrap_or(DEFAULT_REGION).to_string(),
            hosted_zone_id: credentials.get("hosted_zone_id").map(str::to_string),
            zones: Mutex::new(HashMap::new()),
            resolver: context.resolver.clone(),
        })
    }

    async fn signed(&self, method: Method, path: &str, body: String) -> Result<RestResponse, PlaneError> {
        let params = SigningParams {
            access_key_id: self.access_key_id.expose_secret(),
            secret_access_key: self.secret_access_key.expose_secret(),
            region: SIGNING_REGION,
            service: "route53",
            timestamp: Utc::now(),
        };

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-date".to_string(), params.amz_date()),
        ];
        if !body.is_empty() {
            headers.push(("content-type".to_string(), "text/xml".to_string()));
        }

        let auth = authorization(
            &params,
            &CanonicalRequest {
                method: method.as_str(),
                path,
                query: "",
                headers: &headers,
                payload: body.as_bytes(),
            },
        );

        // reqwest derives the same Host value from the URL
        let mut outgoing: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        outgoing.push(("authorization".to_string(), auth));

        self.client.send_signed(method, path, &outgoing, body).await
    }

    async fn list_hosted_zones(&self) -> Result<Vec<HostedZone>, PlaneError> {
        let path = format!("/{}/hostedzone", API_VERSION);
        let response = self.signed(Method::GET, &path, String::new()).await?;
        if !response.is_success() {
            return Err(PlaneError::ApiError(format!(
                "{}: {}",
                response.status, response.body
            )));
        }
        parse_hosted_zones(&response.body)
    }

    async fn hosted_zone_id(&self, domain: &str) -> Result<String, PlaneError> {
        if let Some(id) = &self.hosted_zone_id {
            return Ok(id.clone());
        }

        let root = extract_root_domain(domain);
        if let Some(cached) = self.zones.lock().ok().and_then(|z| z.get(&root).cloned()) {
            return Ok(cached);
        }

        let zone = self
            .list_hosted_zones()
            .await?
            .into_iter()
            .find(|z| z.name.trim_end_matches('.') == root)
            .ok_or_else(|| PlaneError::NotFound(format!("Route53 hosted zone for {}", root)))?;

        let id = zone.short_id().to_string();
        if let Ok(mut zones) = self.zones.lock() {
            zones.insert(root, id.clone());
        }
        Ok(id)
    }

    async fn change(&self, action: ChangeAction, domain: &str, value: &str) -> Result<bool, PlaneError> {
        let zone_id = self.hosted_zone_id(domain).await?;
        let body = build_change_batch(action, domain, value)?;
        let path = format!("/{}/hostedzone/{}/rrset/", API_VERSION, zone_id);

        let response = self.signed(Method::POST, &path, body).await?;
        if response.is_success() {
            info!("Route53: {} TXT record for {}", action.as_str(), domain);
            return Ok(true);
        }

        if action == ChangeAction::Delete && is_missing_record(&response.body) {
            info!("Route53: no TXT record for {}, nothing to delete", domain);
            return Ok(true);
        }

        warn!("Route53 API error: {} - {}", response.status, response.body);
        Ok(false)
    }
}

#[async_trait]
impl DnsProvider for Route53Provider {
    fn provider_name(&self) -> &'static str {
        "route53"
    }

    async fn create_txt_record(&self, domain: &str, value: &str) -> bool {
        self.change(ChangeAction::Upsert, domain, value)
            .await
            .unwrap_or_else(|e| {
                warn!("Route53 create_txt_record failed for {}: {}", domain, e);
                false
            })
    }

    async fn delete_txt_record(&self, domain: &str, value: &str) -> bool {
        self.change(ChangeAction::Delete, domain, value)
            .await
            .unwrap_or_else(|e| {
                warn!("Route53 delete_txt_record failed for {}: {}", domain, e);
                false
            })
    }

    async fn verify_dns_propagation(&self, domain: &str, expected_value: &str) -> bool {
        verify_txt(&*self.resolver, domain, expected_value).await
    }

    async fn validate_credentials(&self) -> bool {
        match self.list_hosted_zones().await {
            Ok(_) => true,
            Err(e) => {
                warn!(region = %self.region, "Route53 credential validation failed: {}", e);
                false
            }
        }
    }
}

/// Deleting a record that does not exist is rejected with InvalidChangeBatch
fn is_missing_record(body: &str) -> bool {
    body.contains("InvalidChangeBatch") && body.to_ascii_lowercase().contains("not found")
}

fn xml_err(e: impl std::fmt::Display) -> PlaneError {
    PlaneError::XmlError(e.to_string())
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<(), PlaneError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn open<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), PlaneError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)
}

fn close<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), PlaneError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

/// `ChangeResourceRecordSetsRequest` body for one TXT change. The value is
/// wrapped in double quotes as Route53 requires.
pub fn build_change_batch(action: ChangeAction, domain: &str, value: &str) -> Result<String, PlaneError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let mut root = BytesStart::new("ChangeResourceRecordSetsRequest");
    root.push_attribute(("xmlns", XML_NAMESPACE));
    writer.write_event(Event::Start(root)).map_err(xml_err)?;

    open(&mut writer, "ChangeBatch")?;
    open(&mut writer, "Changes")?;
    open(&mut writer, "Change")?;
    write_element(&mut writer, "Action", action.as_str())?;
    open(&mut writer, "ResourceRecordSet")?;
    write_element(&mut writer, "Name", domain)?;
    write_element(&mut writer, "Type", "TXT")?;
    write_element(&mut writer, "TTL", &RECORD_TTL.to_string())?;
    open(&mut writer, "ResourceRecords")?;
    open(&mut writer, "ResourceRecord")?;
    write_element(&mut writer, "Value", &format!("\"{}\"", value))?;
    close(&mut writer, "ResourceRecord")?;
    close(&mut writer, "ResourceRecords")?;
    close(&mut writer, "ResourceRecordSet")?;
    close(&mut writer, "Change")?;
    close(&mut writer, "Changes")?;
    close(&mut writer, "ChangeBatch")?;
    close(&mut writer, "ChangeResourceRecordSetsRequest")?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

/// Extract `(Id, Name)` pairs from a `ListHostedZonesResponse`
pub fn parse_hosted_zones(xml: &str) -> Result<Vec<HostedZone>, PlaneError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut zones = Vec::new();
    let mut current: Option<HostedZone> = None;
    let mut element = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if element == "HostedZone" {
                    current = Some(HostedZone::default());
                }
            }
            Event::Text(t) => {
                let Some(zone) = current.as_mut() else {
                    continue;
                };
                let raw = std::str::from_utf8(&t).map_err(xml_err)?;
                let text = unescape(raw).map_err(xml_err)?;
                match element.as_str() {
                    "Id" => zone.id = text.into_owned(),
                    "Name" => zone.name = text.into_owned(),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"HostedZone" {
                    if let Some(zone) = current.take() {
                        zones.push(zone);
                    }
                }
                element.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::propagation::StaticTxtResolver;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ZONES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListHostedZonesResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <HostedZones>
    <HostedZone>
      <Id>/hostedzone/ZOTHER</Id>
      <Name>other.org.</Name>
      <CallerReference>a</CallerReference>
      <Config><PrivateZone>false</PrivateZone></Config>
    </HostedZone>
    <HostedZone>
      <Id>/hostedzone/Z123</Id>
      <Name>example.com.</Name>
      <CallerReference>b</CallerReference>
    </HostedZone>
  </HostedZones>
  <IsTruncated>false</IsTruncated>
</ListHostedZonesResponse>"#;

    fn provider(server: &MockServer, creds: DnsCredentials) -> Route53Provider {
        let ctx = ProviderContext::new(Arc::new(StaticTxtResolver::new())).with_base_url(&server.uri());
        Route53Provider::new(&creds, &ctx).unwrap()
    }

    fn creds() -> DnsCredentials {
        DnsCredentials::new()
            .with("access_key_id", "AKID")
            .with("secret_access_key", "secret")
    }

    #[test]
    fn test_requires_both_keys() {
        let ctx = ProviderContext::new(Arc::new(StaticTxtResolver::new()));
        let err = Route53Provider::new(&DnsCredentials::new().with("access_key_id", "a"), &ctx).unwrap_err();
        assert!(matches!(err, PlaneError::MissingCredential { ref field, .. } if field == "secret_access_key"));
    }

    #[test]
    fn test_change_batch_xml() {
        let xml = build_change_batch(ChangeAction::Upsert, "_acme-challenge.example.com", "test-value").unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(r#"xmlns="https://route53.amazonaws.com/doc/2013-04-01/""#));
        assert!(xml.contains("<Action>UPSERT</Action>"));
        assert!(xml.contains("<Name>_acme-challenge.example.com</Name>"));
        assert!(xml.contains("<Type>TXT</Type>"));
        assert!(xml.contains("<TTL>120</TTL>"));
        assert!(xml.contains("<Value>\"test-value\"</Value>"));
    }

    #[test]
    fn test_parse_hosted_zones() {
        let zones = parse_hosted_zones(ZONES).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[1].name, "example.com.");
        assert_eq!(zones[1].short_id(), "Z123");
    }

    #[tokio::test]
    async fn test_create_resolves_zone_and_signs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ZONES))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2013-04-01/hostedzone/Z123/rrset/"))
            .and(header("content-type", "text/xml"))
            .and(body_string_contains("<Action>UPSERT</Action>"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<ChangeInfo/>"))
            .expect(2)
            .mount(&server)
            .await;

        let provider = provider(&server, creds());
        assert!(provider.create_txt_record("_acme-challenge.example.com", "v1").await);
        // zone id is cached
        assert!(provider.create_txt_record("_acme-challenge.app.example.com", "v2").await);
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2013-04-01/hostedzone/ZFIXED/rrset/"))
            .and(body_string_contains("<Action>DELETE</Action>"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<ErrorResponse><Error><Code>InvalidChangeBatch</Code>\
                 <Message>Tried to delete resource record set but it was not found</Message>\
                 </Error></ErrorResponse>",
            ))
            .mount(&server)
            .await;

        let provider = provider(&server, creds().with("hosted_zone_id", "ZFIXED"));
        assert!(provider.delete_txt_record("_acme-challenge.example.com", "v1").await);
        assert!(provider.delete_txt_record("_acme-challenge.example.com", "v1").await);
    }

    #[tokio::test]
    async fn test_signs_with_global_scope_whatever_the_region() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2013-04-01/hostedzone"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ZONES))
            .mount(&server)
            .await;

        let provider = provider(&server, creds().with("region", "eu-west-1"));
        assert!(provider.validate_credentials().await);

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.contains("/us-east-1/route53/aws4_request"), "{}", auth);
        assert!(!auth.contains("eu-west-1"));
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("<Error><Code>SignatureDoesNotMatch</Code></Error>"))
            .mount(&server)
            .await;

        let provider = provider(&server, creds());
        assert!(!provider.validate_credentials().await);
        assert!(!provider.create_txt_record("_acme-challenge.example.com", "v1").await);
    }
}
