//! HTTP client integration tests against a mock list service

use listform_client::*;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ListClient {
    ListClient::new(ListClientConfig {
        site_url: format!("{}/", server.uri()),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_list_schema_maps_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_api/web/lists/GetByTitle('Work%20Orders')"))
        .and(query_param("$expand", "Fields"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": {
                "Id": "6f1c-guid",
                "Title": "Work Orders",
                "EnableAttachments": true,
                "ForceCheckout": false,
                "Fields": { "results": [
                    {
                        "InternalName": "Amount",
                        "Title": "Amount",
                        "TypeAsString": "Currency",
                        "Required": true,
                        "ReadOnlyField": false,
                        "Hidden": false,
                        "DefaultValue": "0"
                    },
                    {
                        "InternalName": "Status",
                        "Title": "Status",
                        "TypeAsString": "Choice",
                        "Choices": { "results": ["Open", "Closed"] },
                        "FillInChoice": true
                    },
                    {
                        "InternalName": "Due",
                        "Title": "Due Date",
                        "TypeAsString": "DateTime",
                        "DisplayFormat": 0
                    }
                ]}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = client_for(&server).list_schema("Work Orders").await.unwrap();

    assert_eq!(schema.list_id, "6f1c-guid");
    assert!(schema.enable_attachments);
    assert_eq!(schema.fields.len(), 3);

    let amount = &schema.fields[0];
    assert_eq!(amount.type_tag, "Currency");
    assert!(amount.required);
    assert_eq!(amount.default_value.as_deref(), Some("0"));

    let status = &schema.fields[1];
    assert_eq!(status.choices, vec!["Open", "Closed"]);
    assert!(status.fill_in_choice);

    assert_eq!(schema.fields[2].format.as_deref(), Some("DateOnly"));
}

#[tokio::test]
async fn test_get_item_unwraps_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_vti_bin/listdata.svc/WorkOrders(4)"))
        .and(header("accept", "application/json;odata=verbose"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": {
                "__metadata": { "uri": "http://site/WorkOrders(4)", "etag": "W/\"3\"" },
                "Id": 4,
                "Title": "Fix door",
                "Tags": { "__deferred": { "uri": "http://site/WorkOrders(4)/Tags" } }
            }
        })))
        .mount(&server)
        .await;

    let record = client_for(&server).get_item("Work Orders", 4).await.unwrap();
    assert_eq!(record.id(), Some(4));
    assert_eq!(record.get("Title"), Some(&json!("Fix door")));
    assert_eq!(record.deferred_uri("Tags"), Some("http://site/WorkOrders(4)/Tags"));
    assert_eq!(record.metadata().unwrap().version(), Some(3));
}

#[tokio::test]
async fn test_get_item_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_vti_bin/listdata.svc/WorkOrders(9)"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server).get_item("Work Orders", 9).await.unwrap_err();
    assert!(matches!(err, TransportError::NotFound(_)));
}

#[tokio::test]
async fn test_query_items_passes_odata_options() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_vti_bin/listdata.svc/WorkflowHistory"))
        .and(query_param("$top", "25"))
        .and(query_param("$orderby", "DateOccurred"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [
                { "Description": "Started", "DateOccurred": "/Date(1442769001000)/" },
                { "Description": "Approved", "DateOccurred": "/Date(1442769901000)/" }
            ]}
        })))
        .mount(&server)
        .await;

    let rows = client_for(&server)
        .query_items(
            "Workflow History",
            &ItemQuery::new().orderby("DateOccurred").top(25),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("Description"), Some(&json!("Approved")));
}

#[tokio::test]
async fn test_save_item_posts_update_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_vti_bin/Lists.asmx"))
        .and(header(
            "SOAPAction",
            "http://schemas.microsoft.com/sharepoint/soap/UpdateListItems",
        ))
        .and(body_string_contains("<listName>Work Orders</listName>"))
        .and(body_string_contains("<Field Name='Amount'>1234.5</Field>"))
        .and(body_string_contains("<Field Name='ID'>4</Field>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<soap:Envelope><soap:Body><UpdateListItemsResponse><UpdateListItemsResult>
            <Results><Result ID="1,Update"><ErrorCode>0x00000000</ErrorCode>
            <z:row ows_ID="4" ows_Amount="1234.5" /></Result></Results>
            </UpdateListItemsResult></UpdateListItemsResponse></soap:Body></soap:Envelope>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let write = ItemWrite::update(4, None, vec![FieldUpdate::new("Amount", "1234.5")]);
    let id = client_for(&server)
        .save_item("Work Orders", &write)
        .await
        .unwrap();
    assert_eq!(id, 4);
}

#[tokio::test]
async fn test_save_item_reports_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_vti_bin/Lists.asmx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<Results><Result ID="1,New"><ErrorCode>0x80070005</ErrorCode>
            <ErrorText>Access denied.</ErrorText></Result></Results>"#,
        ))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .save_item("Work Orders", &ItemWrite::create(vec![FieldUpdate::new("Title", "x")]))
        .await
        .unwrap_err();
    match err {
        TransportError::Rejected { code, message } => {
            assert_eq!(code, "0x80070005");
            assert_eq!(message, "Access denied.");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_add_attachment_sends_base64() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_vti_bin/Lists.asmx"))
        .and(body_string_contains("<fileName>notes.txt</fileName>"))
        .and(body_string_contains("<attachment>aGVsbG8=</attachment>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<AddAttachmentResult>/Lists/WorkOrders/Attachments/4/notes.txt</AddAttachmentResult>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let attachment = client_for(&server)
        .add_attachment("Work Orders", 4, "notes.txt", b"hello")
        .await
        .unwrap();
    assert_eq!(attachment.name, "notes.txt");
    assert!(attachment.uri.contains("EntitySet='WorkOrders',ItemId=4"));
}

#[tokio::test]
async fn test_delete_item_sends_if_match() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_vti_bin/listdata.svc/WorkOrders(4)"))
        .and(header("X-HTTP-Method", "DELETE"))
        .and(header("If-Match", "W/\"3\""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let meta = ItemMetadata {
        uri: format!("{}/_vti_bin/listdata.svc/WorkOrders(4)", server.uri()),
        etag: Some("W/\"3\"".into()),
    };
    client_for(&server).delete_item(&meta).await.unwrap();
}

#[tokio::test]
async fn test_current_principal_includes_groups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_api/Web/CurrentUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": {
                "Id": 12,
                "Title": "Jane Doe",
                "LoginName": "i:0#.w|corp\\jdoe",
                "Email": "jdoe@example.com",
                "Groups": { "results": [
                    { "Id": 5, "Title": "Finance" },
                    { "Id": 8, "Title": "Facilities Owners" }
                ]}
            }
        })))
        .mount(&server)
        .await;

    let principal = client_for(&server).current_principal().await.unwrap();
    assert_eq!(principal.id, 12);
    assert_eq!(principal.login, "i:0#.w|corp\\jdoe");
    assert_eq!(principal.groups, vec![Group::new(5, "Finance"), Group::new(8, "Facilities Owners")]);
}

#[tokio::test]
async fn test_search_people_filters_hidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_vti_bin/listdata.svc/UserInformationList"))
        .and(query_param("$top", "10"))
        .and(query_param("$orderby", "Name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [
                { "Id": 3, "Name": "Ann Lee", "Department": "Finance" }
            ]}
        })))
        .mount(&server)
        .await;

    let people = client_for(&server).search_people("An", 10).await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].department.as_deref(), Some("Finance"));
}

#[tokio::test]
async fn test_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_api/Web/CurrentUser"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client_for(&server).current_principal().await.unwrap_err();
    match err {
        TransportError::Server { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}
