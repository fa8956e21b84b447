// advisable because not all test modules use all functions of this module:
#![allow(dead_code)]

use fisclink::{
    build_response, LinkConfiguration, LinkParams, Message, MessageCodec, SwitchLink,
};
use flexi_logger::{opt_format, Logger, LoggerHandle};
use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

// Returns a logger that prints out all info, warn and error messages.
pub fn init_logger() -> LoggerHandle {
    Logger::try_with_env_or_str("info")
        .unwrap()
        .format(opt_format)
        .start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {e}"))
}

/// Decides how the simulated switch answers one request: `None` swallows
/// it (timeout tests), `Some((delay, response))` answers after the delay.
pub type SimResponder = Arc<dyn Fn(&Message) -> Option<(Duration, Message)> + Send + Sync>;

/// Answers everything with an approval after no delay; financial
/// requests additionally get an authorization code.
pub fn approving_responder() -> SimResponder {
    Arc::new(|request| {
        let mut response = build_response(request, "00").unwrap();
        if request.mti().digits() == "0200" {
            response.set(38, "ABC123").unwrap();
        }
        Some((Duration::ZERO, response))
    })
}

/// A dual-channel switch simulator: reads requests off connections to
/// its send listener, writes responses into the most recent connection
/// on its receive listener. Mirrors the real switch topology, where the
/// two directions never share a socket.
pub struct SwitchSimulator {
    pub send_addr: String,
    pub receive_addr: String,
    responses_tx: mpsc::Sender<Message>,
    send_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SwitchSimulator {
    pub async fn start(responder: SimResponder) -> Self {
        let codec = MessageCodec::fisc().unwrap();
        let send_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let receive_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let send_addr = send_listener.local_addr().unwrap().to_string();
        let receive_addr = receive_listener.local_addr().unwrap().to_string();

        let (responses_tx, responses_rx) = mpsc::channel::<Message>(64);
        let receive_conn: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        let send_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>> = Arc::new(StdMutex::new(Vec::new()));

        let tasks = vec![
            tokio::spawn(accept_send_connections(
                send_listener,
                codec.clone(),
                responder,
                responses_tx.clone(),
                Arc::clone(&send_tasks),
            )),
            tokio::spawn(accept_receive_connections(
                receive_listener,
                Arc::clone(&receive_conn),
            )),
            tokio::spawn(forward_responses(responses_rx, codec, receive_conn)),
        ];

        Self {
            send_addr,
            receive_addr,
            responses_tx,
            send_tasks,
            tasks,
        }
    }

    /// Pushes a message into the receive connection without any request
    /// having asked for it.
    pub async fn push_unsolicited(&self, message: Message) {
        self.responses_tx.send(message).await.unwrap();
    }

    /// Drops every open send-side connection, as if the switch's request
    /// port went away. The receive side stays up.
    pub fn drop_send_connections(&self) {
        for task in self.send_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SwitchSimulator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.drop_send_connections();
    }
}

async fn accept_send_connections(
    listener: TcpListener,
    codec: MessageCodec,
    responder: SimResponder,
    responses_tx: mpsc::Sender<Message>,
    send_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        let Ok((stream, _peer)) = listener.accept().await else {
            break;
        };
        let task = tokio::spawn(read_requests(
            stream,
            codec.clone(),
            Arc::clone(&responder),
            responses_tx.clone(),
        ));
        send_tasks.lock().unwrap().push(task);
    }
}

async fn read_requests(
    mut stream: TcpStream,
    codec: MessageCodec,
    responder: SimResponder,
    responses_tx: mpsc::Sender<Message>,
) {
    loop {
        let Ok(frame) = codec.read_frame(&mut stream).await else {
            break;
        };
        let Ok(request) = codec.decode(&frame) else {
            break;
        };
        if let Some((delay, response)) = responder(&request) {
            let responses_tx = responses_tx.clone();
            tokio::spawn(async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                let _ = responses_tx.send(response).await;
            });
        }
    }
}

async fn accept_receive_connections(listener: TcpListener, slot: Arc<Mutex<Option<TcpStream>>>) {
    loop {
        let Ok((stream, _peer)) = listener.accept().await else {
            break;
        };
        *slot.lock().await = Some(stream);
    }
}

async fn forward_responses(
    mut responses_rx: mpsc::Receiver<Message>,
    codec: MessageCodec,
    slot: Arc<Mutex<Option<TcpStream>>>,
) {
    while let Some(message) = responses_rx.recv().await {
        // wait for a live receive connection, surviving reconnects
        for _attempt in 0..200 {
            let mut guard = slot.lock().await;
            if let Some(stream) = guard.as_mut() {
                match codec.write_message(stream, &message).await {
                    Ok(()) => break,
                    Err(_e) => {
                        *guard = None;
                    }
                }
            }
            drop(guard);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A connected link against the given simulator with test-friendly
/// configuration: quick connects, long heartbeat (so probes never
/// interleave with scenario traffic).
pub async fn connected_link(sim: &SwitchSimulator, config: LinkConfiguration) -> SwitchLink {
    let (send_host, send_port) = split_addr(&sim.send_addr);
    let (receive_host, receive_port) = split_addr(&sim.receive_addr);
    let params = LinkParams::builder()
        .send(send_host, send_port)
        .receive(receive_host, receive_port)
        .institution_id("9990001")
        .build()
        .unwrap();
    let link = SwitchLink::new(params, config, MessageCodec::fisc().unwrap(), |_channel, _msg| {});
    link.connect().await.unwrap();
    link
}

pub fn test_configuration() -> LinkConfiguration {
    LinkConfiguration::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_heartbeat_interval(Duration::from_secs(300))
        .with_read_timeout(Duration::from_secs(300))
}

pub fn split_addr(addr: &str) -> (String, u16) {
    let (host, port) = addr.rsplit_once(':').unwrap();
    (host.to_string(), port.parse().unwrap())
}
