pub mod demo;
pub mod routes;
