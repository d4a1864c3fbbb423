use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::fetch::HttpClient;
use crate::services::feature_store::{
    EditResult, Feature, FeatureStoreApi, LayerDefinition, RemoteStore, StoreKind,
};

const PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<SearchItem>,
    #[serde(rename = "nextStart", default = "no_more_pages")]
    next_start: i64,
}

fn no_more_pages() -> i64 {
    -1
}

#[derive(Deserialize)]
struct SearchItem {
    id: String,
    title: String,
    #[serde(rename = "type")]
    type_name: String,
    owner: String,
    url: Option<String>,
    #[serde(default)]
    modified: i64,
    #[serde(default)]
    protected: bool,
}

impl From<SearchItem> for RemoteStore {
    fn from(item: SearchItem) -> Self {
        RemoteStore {
            id: item.id,
            title: item.title,
            kind: StoreKind::from_type_name(&item.type_name),
            owner: item.owner,
            url: item.url.filter(|u| !u.is_empty()),
            modified: DateTime::from_timestamp_millis(item.modified).unwrap_or_default(),
            protected: item.protected,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateServiceResponse {
    #[serde(default)]
    success: bool,
    service_item_id: String,
    #[serde(alias = "serviceurl")]
    service_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddResult {
    #[serde(default)]
    success: bool,
    object_id: Option<i64>,
    error: Option<AddError>,
}

#[derive(Deserialize)]
struct AddError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    description: String,
}

impl From<AddResult> for EditResult {
    fn from(r: AddResult) -> Self {
        EditResult {
            success: r.success,
            object_id: r.object_id,
            error: r.error.map(|e| format!("{} (code {})", e.description, e.code)),
        }
    }
}

/// [`FeatureStoreApi`] over the ArcGIS portal and feature service REST API.
///
/// Authentication is the wrapped client's concern (see
/// [`crate::fetch::auth::ApiKey::esri_bearer`]). The platform reports most
/// failures as `200 OK` with an `error` object in the body; those become
/// errors here too.
pub struct ArcGisClient<C> {
    http: C,
    portal_url: String,
    username: String,
    requests: reqwest::Client,
}

impl<C: HttpClient> ArcGisClient<C> {
    pub fn new(http: C, portal_url: &str, username: &str) -> Self {
        Self {
            http,
            portal_url: portal_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            requests: reqwest::Client::new(),
        }
    }

    /// Like [`ArcGisClient::new`], asking the portal who the token belongs to
    /// when no username is given.
    pub async fn connect(http: C, portal_url: &str, username: Option<&str>) -> Result<Self> {
        let mut client = Self::new(http, portal_url, username.unwrap_or_default());
        if client.username.is_empty() {
            let url = format!("{}/sharing/rest/community/self", client.portal_url);
            let me = client.get(&url, &[]).await.context("Failed to resolve portal user")?;
            client.username = me["username"]
                .as_str()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| anyhow!("portal did not report a username for this token"))?
                .to_string();
        }
        debug!(username = %client.username, portal = %client.portal_url, "Connected to portal");
        Ok(client)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    async fn get(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut query = vec![("f", "json".to_string())];
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        let req = self.requests.get(url).query(&query).build()?;
        self.send(req).await
    }

    async fn post(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut form = vec![("f", "json".to_string())];
        form.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        let req = self.requests.post(url).form(&form).build()?;
        self.send(req).await
    }

    async fn send(&self, req: reqwest::Request) -> Result<Value> {
        let url = req.url().path().to_string();
        let response = self
            .http
            .execute(req)
            .await
            .map_err(|e| anyhow!("Failed to send request to {}: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned status {}: {}", url, status, body);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse response from {}: {}", url, e))?;
        check_error(&body).with_context(|| format!("request to {url} failed"))?;
        Ok(body)
    }
}

/// Turns an in-body `{"error": {...}}` into an error.
fn check_error(body: &Value) -> Result<()> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let code = error["code"].as_i64().unwrap_or_default();
    let message = error["message"].as_str().unwrap_or("unknown error");
    let details: Vec<&str> = error["details"]
        .as_array()
        .map(|d| d.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if details.is_empty() {
        bail!("{message} (code {code})")
    } else {
        bail!("{message} (code {code}): {}", details.join("; "))
    }
}

fn require_success(body: &Value, operation: &str) -> Result<()> {
    match body["success"].as_bool() {
        Some(false) => bail!("{operation} reported failure: {body}"),
        _ => Ok(()),
    }
}

/// Admin endpoint of a hosted service or layer url.
fn admin_url(url: &str) -> Result<String> {
    if !url.contains("/rest/services/") {
        bail!("'{url}' is not a hosted feature service url");
    }
    Ok(url.replacen("/rest/services/", "/rest/admin/services/", 1))
}

fn search_query(title: &str, owner: &str, kinds: &[StoreKind]) -> String {
    let escaped = title.replace('"', "\\\"");
    let mut q = format!("title:\"{escaped}\" AND owner:\"{owner}\"");
    if !kinds.is_empty() {
        let types: Vec<String> = kinds
            .iter()
            .map(|k| format!("type:\"{}\"", k.type_name()))
            .collect();
        q.push_str(&format!(" AND ({})", types.join(" OR ")));
    }
    q
}

#[async_trait]
impl<C: HttpClient> FeatureStoreApi for ArcGisClient<C> {
    async fn search_owned(&self, title: &str, kinds: &[StoreKind]) -> Result<Vec<RemoteStore>> {
        let url = format!("{}/sharing/rest/search", self.portal_url);
        let q = search_query(title, &self.username, kinds);

        let mut items = Vec::new();
        let mut start: i64 = 1;
        loop {
            let body = self
                .get(
                    &url,
                    &[
                        ("q", q.clone()),
                        ("num", PAGE_SIZE.to_string()),
                        ("start", start.to_string()),
                    ],
                )
                .await?;
            let page: SearchPage =
                serde_json::from_value(body).context("unexpected search response")?;
            items.extend(page.results.into_iter().map(RemoteStore::from));

            if page.next_start <= start {
                break;
            }
            start = page.next_start;
        }

        // Search only narrows by owner; it does not guarantee it.
        items.retain(|s| s.owner == self.username);
        debug!(query = %q, found = items.len(), "Portal search");
        Ok(items)
    }

    async fn create_point_store(
        &self,
        title: &str,
        definition: &LayerDefinition,
    ) -> Result<RemoteStore> {
        let url = format!(
            "{}/sharing/rest/content/users/{}/createService",
            self.portal_url, self.username
        );
        let create_parameters = json!({
            "name": title,
            "serviceDescription": "",
            "hasStaticData": false,
            "maxRecordCount": 2000,
            "supportedQueryFormats": "JSON",
            "capabilities": "Create,Delete,Query,Update,Editing",
            "spatialReference": { "wkid": crate::services::feature_store::WGS84_WKID },
            "initialExtent": definition.extent,
            "allowGeometryUpdates": true,
        });
        let body = self
            .post(
                &url,
                &[
                    ("createParameters", create_parameters.to_string()),
                    ("outputType", "featureService".to_string()),
                ],
            )
            .await?;
        let created: CreateServiceResponse =
            serde_json::from_value(body).context("unexpected createService response")?;
        if !created.success {
            bail!("createService for '{title}' reported failure");
        }

        let mut layer = serde_json::to_value(definition)?;
        layer["id"] = json!(0);
        layer["type"] = json!("Feature Layer");
        layer["capabilities"] = json!("Create,Delete,Query,Update,Editing");
        let add_url = format!("{}/addToDefinition", admin_url(&created.service_url)?);
        let body = self
            .post(
                &add_url,
                &[("addToDefinition", json!({ "layers": [layer] }).to_string())],
            )
            .await
            .with_context(|| format!("service '{title}' was created but its layer was not"))?;
        require_success(&body, "addToDefinition")?;

        Ok(RemoteStore {
            id: created.service_item_id,
            title: title.to_string(),
            kind: StoreKind::Service,
            owner: self.username.clone(),
            url: Some(created.service_url),
            modified: Utc::now(),
            protected: false,
        })
    }

    async fn layer_definition(&self, layer_url: &str) -> Result<LayerDefinition> {
        let body = self.get(layer_url, &[]).await?;
        serde_json::from_value(body).context("unexpected layer definition")
    }

    async fn truncate(&self, layer_url: &str) -> Result<()> {
        let url = format!("{}/truncate", admin_url(layer_url)?);
        let body = self.post(&url, &[("async", "false".to_string())]).await?;
        require_success(&body, "truncate")
    }

    async fn delete_all_features(&self, layer_url: &str) -> Result<()> {
        let url = format!("{layer_url}/deleteFeatures");
        let body = self.post(&url, &[("where", "1=1".to_string())]).await?;
        require_success(&body, "deleteFeatures")
    }

    async fn add_features(&self, layer_url: &str, features: &[Feature]) -> Result<Vec<EditResult>> {
        let url = format!("{layer_url}/addFeatures");
        let body = self
            .post(
                &url,
                &[
                    ("features", serde_json::to_string(features)?),
                    ("rollbackOnFailure", "false".to_string()),
                ],
            )
            .await?;
        let results: Vec<AddResult> = serde_json::from_value(body["addResults"].clone())
            .context("addFeatures response has no addResults")?;
        Ok(results.into_iter().map(EditResult::from).collect())
    }

    async fn delete_item(&self, store: &RemoteStore) -> Result<()> {
        let url = format!(
            "{}/sharing/rest/content/users/{}/items/{}/delete",
            self.portal_url, store.owner, store.id
        );
        let body = self.post(&url, &[]).await?;
        require_success(&body, "delete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoundingBox;
    use crate::fetch::testing::ScriptedClient;
    use crate::services::feature_store::{PointGeometry, SpatialReference};
    use crate::sync::schema::vehicle_layer_definition;
    use std::collections::HashMap;

    const PORTAL: &str = "https://www.arcgis.com";
    const SERVICE: &str =
        "https://services1.arcgis.com/org/arcgis/rest/services/Vehicles/FeatureServer";

    fn client(responses: Vec<Value>) -> ArcGisClient<ScriptedClient> {
        let scripted = responses
            .into_iter()
            .map(|v| (200, v.to_string().into_bytes()))
            .collect();
        ArcGisClient::new(ScriptedClient::new(scripted), PORTAL, "fleet")
    }

    fn sent(c: &ArcGisClient<ScriptedClient>, i: usize) -> (String, HashMap<String, String>) {
        let requests = c.http.requests.lock().unwrap();
        let req = &requests[i];
        let mut params: HashMap<String, String> = req.url().query_pairs().into_owned().collect();
        if let Some(body) = req.body().and_then(|b| b.as_bytes()) {
            let form = format!("http://form/?{}", String::from_utf8_lossy(body));
            let parsed = reqwest::Url::parse(&form).unwrap();
            params.extend(parsed.query_pairs().into_owned());
        }
        let mut url = req.url().clone();
        url.set_query(None);
        (url.to_string(), params)
    }

    fn item(id: &str, title: &str, type_name: &str, owner: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "type": type_name,
            "owner": owner,
            "url": format!("{SERVICE}"),
            "modified": 1_760_000_000_000i64,
            "protected": false,
        })
    }

    #[tokio::test]
    async fn test_search_builds_query_and_pages() {
        let c = client(vec![
            json!({ "results": [item("a1", "Vehicles", "Feature Service", "fleet")], "nextStart": 101 }),
            json!({ "results": [item("a2", "Vehicles_old", "Feature Layer", "fleet")], "nextStart": -1 }),
        ]);

        let found = c
            .search_owned("Vehicles", &[StoreKind::Service, StoreKind::Layer])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, StoreKind::Service);
        assert_eq!(found[1].kind, StoreKind::Layer);
        assert_eq!(found[0].modified.timestamp_millis(), 1_760_000_000_000);

        let (url, params) = sent(&c, 0);
        assert_eq!(url, format!("{PORTAL}/sharing/rest/search"));
        assert_eq!(params["f"], "json");
        assert_eq!(
            params["q"],
            "title:\"Vehicles\" AND owner:\"fleet\" AND (type:\"Feature Service\" OR type:\"Feature Layer\")"
        );
        assert_eq!(params["start"], "1");
        assert_eq!(sent(&c, 1).1["start"], "101");
    }

    #[tokio::test]
    async fn test_search_drops_foreign_owners() {
        let c = client(vec![json!({
            "results": [
                item("a1", "Vehicles", "Feature Service", "fleet"),
                item("b1", "Vehicles", "Feature Service", "someone_else"),
            ],
            "nextStart": -1
        })]);
        let found = c.search_owned("Vehicles", &[]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a1");
        assert_eq!(sent(&c, 0).1["q"], "title:\"Vehicles\" AND owner:\"fleet\"");
    }

    #[tokio::test]
    async fn test_error_body_is_an_error() {
        let c = client(vec![json!({
            "error": { "code": 498, "message": "Invalid token.", "details": ["Token expired"] }
        })]);
        let err = c.search_owned("Vehicles", &[]).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Invalid token."));
        assert!(msg.contains("498"));
        assert!(msg.contains("Token expired"));
    }

    #[tokio::test]
    async fn test_http_status_is_an_error() {
        let c = ArcGisClient::new(ScriptedClient::new(vec![(503, b"busy".to_vec())]), PORTAL, "fleet");
        assert!(c.layer_definition(&format!("{SERVICE}/0")).await.is_err());
    }

    #[tokio::test]
    async fn test_create_point_store_adds_layer() {
        let c = client(vec![
            json!({ "success": true, "serviceItemId": "new1", "serviceurl": SERVICE, "name": "Vehicles_20261016_010000" }),
            json!({ "success": true }),
        ]);
        let def = vehicle_layer_definition("Vehicles_20261016_010000", BoundingBox::default().to_extent());

        let store = c.create_point_store("Vehicles_20261016_010000", &def).await.unwrap();
        assert_eq!(store.id, "new1");
        assert_eq!(store.kind, StoreKind::Service);
        assert_eq!(store.url.as_deref(), Some(SERVICE));

        let (url, params) = sent(&c, 0);
        assert_eq!(url, format!("{PORTAL}/sharing/rest/content/users/fleet/createService"));
        let create: Value = serde_json::from_str(&params["createParameters"]).unwrap();
        assert_eq!(create["name"], "Vehicles_20261016_010000");
        assert_eq!(create["spatialReference"]["wkid"], 4326);

        let (url, params) = sent(&c, 1);
        assert_eq!(
            url,
            "https://services1.arcgis.com/org/arcgis/rest/admin/services/Vehicles/FeatureServer/addToDefinition"
        );
        let added: Value = serde_json::from_str(&params["addToDefinition"]).unwrap();
        let layer = &added["layers"][0];
        assert_eq!(layer["geometryType"], "esriGeometryPoint");
        assert_eq!(layer["fields"].as_array().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let c = client(vec![json!({
            "error": { "code": 400, "message": "Service name already exists" }
        })]);
        let def = vehicle_layer_definition("x", BoundingBox::default().to_extent());
        assert!(c.create_point_store("x", &def).await.is_err());
    }

    #[tokio::test]
    async fn test_layer_definition_parses() {
        let c = client(vec![json!({
            "name": "Vehicles",
            "geometryType": "esriGeometryPoint",
            "objectIdField": "OBJECTID",
            "fields": [
                { "name": "OBJECTID", "type": "esriFieldTypeOID", "nullable": false, "editable": false },
                { "name": "VehicleID", "type": "esriFieldTypeString", "length": 50 },
                { "name": "Shape__Area", "type": "esriFieldTypeGeometry" }
            ]
        })]);
        let def = c.layer_definition(&format!("{SERVICE}/0")).await.unwrap();
        assert!(def.is_point());
        assert_eq!(def.fields.len(), 3);
        assert_eq!(def.fields[2].field_type, crate::services::feature_store::FieldType::Other);
    }

    #[tokio::test]
    async fn test_clear_endpoints() {
        let c = client(vec![json!({ "success": true }), json!({ "deleteResults": [] })]);
        let layer = format!("{SERVICE}/0");
        c.truncate(&layer).await.unwrap();
        c.delete_all_features(&layer).await.unwrap();

        let (url, _) = sent(&c, 0);
        assert_eq!(
            url,
            "https://services1.arcgis.com/org/arcgis/rest/admin/services/Vehicles/FeatureServer/0/truncate"
        );
        let (url, params) = sent(&c, 1);
        assert_eq!(url, format!("{layer}/deleteFeatures"));
        assert_eq!(params["where"], "1=1");
    }

    #[tokio::test]
    async fn test_truncate_refused() {
        let c = client(vec![json!({ "success": false })]);
        assert!(c.truncate(&format!("{SERVICE}/0")).await.is_err());
    }

    #[tokio::test]
    async fn test_add_features_results() {
        let c = client(vec![json!({
            "addResults": [
                { "objectId": 1, "success": true },
                { "objectId": -1, "success": false, "error": { "code": 1000, "description": "bad value" } }
            ]
        })]);
        let mut attributes = serde_json::Map::new();
        attributes.insert("VehicleID".to_string(), json!("V1"));
        let feature = Feature {
            geometry: PointGeometry { x: 138.6, y: -34.9, spatial_reference: SpatialReference::wgs84() },
            attributes,
        };

        let results = c
            .add_features(&format!("{SERVICE}/0"), &[feature.clone(), feature])
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[1].error.as_deref().unwrap().contains("bad value"));

        let (_, params) = sent(&c, 0);
        let features: Value = serde_json::from_str(&params["features"]).unwrap();
        assert_eq!(features[0]["geometry"]["spatialReference"]["wkid"], 4326);
        assert_eq!(features[0]["attributes"]["VehicleID"], "V1");
    }

    #[tokio::test]
    async fn test_delete_item_uses_owner() {
        let c = client(vec![json!({ "success": true, "itemId": "old1" })]);
        let store: RemoteStore = serde_json::from_value::<SearchItem>(item(
            "old1",
            "Vehicles_20260101_000000",
            "Feature Service",
            "fleet",
        ))
        .unwrap()
        .into();
        c.delete_item(&store).await.unwrap();
        let (url, _) = sent(&c, 0);
        assert_eq!(url, format!("{PORTAL}/sharing/rest/content/users/fleet/items/old1/delete"));
    }

    #[tokio::test]
    async fn test_connect_resolves_username() {
        let http = ScriptedClient::new(vec![(200, json!({ "username": "fleet_admin" }).to_string().into_bytes())]);
        let c = ArcGisClient::connect(http, "https://www.arcgis.com/", None).await.unwrap();
        assert_eq!(c.username(), "fleet_admin");
        assert_eq!(sent(&c, 0).0, format!("{PORTAL}/sharing/rest/community/self"));
    }

    #[tokio::test]
    async fn test_connect_with_username_skips_lookup() {
        let c = ArcGisClient::connect(ScriptedClient::default(), PORTAL, Some("fleet")).await.unwrap();
        assert_eq!(c.username(), "fleet");
        assert_eq!(c.http.calls(), 0);
    }
}
