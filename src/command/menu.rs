//! Command tree: top-level commands, nested subcommand menus, and
//! argument-count checks.

/// Who may run a top-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    General,
    /// Owner only, and only on the home server.
    Admin,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Admin => "admin",
        }
    }
}

/// Leaf operations a resolved command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Help,
    Info,
    ServerList,
    ServerAdd,
    ServerRemove,
    ServerSetAddr,
    ChannelAdd,
    ChannelRemove,
    ChannelSync,
    TestPing,
    TestMsgsize,
    TestClientPanic,
    TestCommandPanic,
}

#[derive(Debug)]
pub enum Node {
    Command {
        name: &'static str,
        /// Minimum number of arguments.
        arity: usize,
        usage: &'static str,
        action: Action,
    },
    Menu {
        name: &'static str,
        children: Vec<Node>,
    },
}

/// Outcome of walking the tree with a command line.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    Run { action: Action, args: &'a [String] },
    /// Not enough to go on; carries the usage line to show.
    Usage(String),
}

impl Node {
    const fn leaf(name: &'static str, action: Action) -> Self {
        Self::Command {
            name,
            arity: 0,
            usage: "",
            action,
        }
    }

    const fn with_args(name: &'static str, arity: usize, usage: &'static str, action: Action) -> Self {
        Self::Command {
            name,
            arity,
            usage,
            action,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { name, .. } | Self::Menu { name, .. } => *name,
        }
    }

    /// Resolve the words following this node's own name.
    pub fn resolve<'a>(&self, args: &'a [String]) -> Resolution<'a> {
        let mut path = Vec::new();
        self.resolve_in(args, &mut path)
    }

    fn resolve_in<'a>(&self, args: &'a [String], path: &mut Vec<&'static str>) -> Resolution<'a> {
        path.push(self.name());
        match self {
            Self::Command {
                arity,
                usage,
                action,
                ..
            } => {
                if args.len() < *arity {
                    return Resolution::Usage(format!("{} {usage}", path.join(" ")));
                }
                Resolution::Run {
                    action: *action,
                    args,
                }
            }
            Self::Menu { children, .. } => {
                if let Some(first) = args.first() {
                    let wanted = first.to_lowercase();
                    if let Some(child) = children.iter().find(|c| c.name() == wanted) {
                        return child.resolve_in(&args[1..], path);
                    }
                }
                let names: Vec<&str> = children.iter().map(Node::name).collect();
                Resolution::Usage(format!(
                    "{} <subcommand>\n  {}",
                    path.join(" "),
                    names.join(", ")
                ))
            }
        }
    }
}

/// A top-level command as listed by `help`.
#[derive(Debug)]
pub struct TopLevel {
    pub node: Node,
    pub category: Category,
    pub description: &'static str,
}

/// Every command the bot understands, in help order.
pub fn commands() -> Vec<TopLevel> {
    vec![
        TopLevel {
            node: Node::leaf("help", Action::Help),
            category: Category::General,
            description: "show all commands",
        },
        TopLevel {
            node: Node::leaf("info", Action::Info),
            category: Category::General,
            description: "about me",
        },
        TopLevel {
            node: Node::Menu {
                name: "server",
                children: vec![
                    Node::leaf("list", Action::ServerList),
                    Node::with_args("add", 2, "<name> <address>", Action::ServerAdd),
                    Node::with_args("remove", 1, "<name>", Action::ServerRemove),
                    Node::Menu {
                        name: "set",
                        children: vec![Node::with_args(
                            "addr",
                            2,
                            "<name> <address>",
                            Action::ServerSetAddr,
                        )],
                    },
                ],
            },
            category: Category::Admin,
            description: "manage servers",
        },
        TopLevel {
            node: Node::Menu {
                name: "channel",
                children: vec![
                    Node::leaf("list", Action::ServerList),
                    Node::with_args(
                        "add",
                        2,
                        "<server name> <channel name>",
                        Action::ChannelAdd,
                    ),
                    Node::with_args(
                        "remove",
                        2,
                        "<server name> <channel name>",
                        Action::ChannelRemove,
                    ),
                    Node::leaf("sync", Action::ChannelSync),
                ],
            },
            category: Category::Admin,
            description: "manage channels",
        },
        TopLevel {
            node: Node::Menu {
                name: "test",
                children: vec![
                    Node::leaf("ping", Action::TestPing),
                    Node::leaf("msgsize", Action::TestMsgsize),
                    Node::leaf("clientpanic", Action::TestClientPanic),
                    Node::leaf("commandpanic", Action::TestCommandPanic),
                ],
            },
            category: Category::Admin,
            description: "various test functions",
        },
    ]
}
