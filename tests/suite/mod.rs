mod fragmentation;
mod live;
mod pipeline;
mod request;
