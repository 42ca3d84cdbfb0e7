//! DOM mirror example - load a document, watch it change, query it

use browser::{InspectorConfig, InspectorSession};
use dom::NodeRef;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = InspectorConfig {
        cdp_url: "ws://localhost:9222/devtools/browser".to_string(),
        ..Default::default()
    };
    println!("Connecting to Chrome at: {}", config.cdp_url);

    let session = InspectorSession::connect(config).await?;
    let mirror = session.mirror().clone();

    // Print every change the pump applies
    let mut changes = mirror.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            println!("Change: {:?}", change);
        }
    });

    let root = mirror.get_document(Some(-1), Some(true)).await?;
    println!(
        "Document {} loaded, {} nodes mirrored",
        root.document_url.as_deref().unwrap_or("<unknown>"),
        mirror.read(|arena| arena.len()).await
    );

    if let Some(body) = mirror.query_selector(root.node_id, "body").await? {
        let html = mirror.get_outer_html(&NodeRef::Node(body)).await?;
        println!("<body> is {} bytes of markup", html.len());

        let model = mirror.get_box_model(&NodeRef::Node(body)).await?;
        println!("<body> box: {}x{}", model.width, model.height);
    }

    let links = session.search().perform_search("a[href]", false).await?;
    let first = links.result_count.min(5);
    let ids = session
        .search()
        .get_search_results(&links.search_id, 0, first)
        .await?;
    println!("{} links, first {:?}", links.result_count, ids);
    session.search().discard(&links.search_id).await?;

    // Let some mutations stream in
    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

    session.close().await?;
    println!("Disconnected");

    Ok(())
}
