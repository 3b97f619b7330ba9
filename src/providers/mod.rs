pub mod meta_graph;
pub mod meta_oauth;
