use testcontainers::{
    clients::Cli,
    core::WaitFor,
    images::generic::GenericImage,
    Container,
};
use tokio::sync::OnceCell;

static DOCKER: OnceCell<Cli> = OnceCell::const_new();

const ROUTER_CONF: &str = r#"
router {
    mode: standalone
    id: portal-test-router
}

listener {
    host: 0.0.0.0
    port: 5672
    role: normal
    authenticatePeer: no
    saslMechanisms: ANONYMOUS
}
"#;

/// Starts a dispositions-propagating AMQP router. The mutex protocol
/// needs end-to-end settlement, which a store-and-forward broker does
/// not provide.
pub async fn setup_router() -> (Container<'static, GenericImage>, u16) {
    let docker = DOCKER.get_or_init(|| async { Cli::default() }).await;
    let image = GenericImage::new("quay.io/skupper/skupper-router", "latest")
        .with_env_var("QDROUTERD_CONF", ROUTER_CONF)
        .with_env_var("QDROUTERD_CONF_TYPE", "router")
        .with_exposed_port(5672)
        .with_wait_for(WaitFor::seconds(3));
    let node = docker.run(image);

    let port = node.get_host_port_ipv4(5672);
    (node, port)
}
