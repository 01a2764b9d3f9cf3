use change_discovery::MockTransport;
use serde_json::{json, Value};

pub const ROOT_URL: &str = "https://library.example.org/activity/all-changes";

pub fn page_url(n: usize) -> String {
    format!("https://library.example.org/activity/page-{n}")
}

pub fn manifest_url(name: &str) -> String {
    format!("https://library.example.org/iiif/{name}/manifest")
}

/// Builds a feed of pages numbered from 0 (origin) upward.
#[derive(Default)]
pub struct FeedBuilder {
    /// Activities per page, oldest page first, each page newest-first
    pages: Vec<Vec<Value>>,
}

impl FeedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page newer than every page so far.
    pub fn page(mut self, activities: Vec<Value>) -> Self {
        self.pages.push(activities);
        self
    }

    pub fn root_document(&self) -> Value {
        let last = self.pages.len().saturating_sub(1);
        json!({
            "@context": "http://iiif.io/api/discovery/1/context.json",
            "id": ROOT_URL,
            "type": "OrderedCollection",
            "totalItems": self.pages.iter().map(Vec::len).sum::<usize>(),
            "first": { "id": page_url(0), "type": "OrderedCollectionPage" },
            "last": { "id": page_url(last), "type": "OrderedCollectionPage" }
        })
    }

    /// Register the root and all pages on a fresh transport.
    pub fn into_transport(self) -> MockTransport {
        let mut transport = MockTransport::new().with_json(ROOT_URL, self.root_document());
        for (n, items) in self.pages.into_iter().enumerate() {
            let mut doc = json!({
                "id": page_url(n),
                "type": "OrderedCollectionPage",
                "partOf": { "id": ROOT_URL, "type": "OrderedCollection" },
                "orderedItems": items
            });
            if n > 0 {
                doc["prev"] = json!({ "id": page_url(n - 1), "type": "OrderedCollectionPage" });
            }
            transport = transport.with_json(page_url(n), doc);
        }
        transport
    }
}

pub fn activity(kind: &str, object_type: &str, id: &str, end_time: &str) -> Value {
    json!({
        "type": kind,
        "object": { "id": id, "type": object_type },
        "endTime": end_time
    })
}

pub fn manifest_activity(kind: &str, name: &str, end_time: &str) -> Value {
    activity(kind, "Manifest", &manifest_url(name), end_time)
}

pub fn manifest_body(name: &str) -> Value {
    json!({
        "@context": "http://iiif.io/api/presentation/2/context.json",
        "@id": manifest_url(name),
        "@type": "sc:Manifest",
        "label": format!("Item {name}"),
        "metadata": [{ "label": "Date", "value": "1897" }],
        "sequences": [{ "canvases": [] }]
    })
}
