//! Abstract syntax tree
//!
//! Nodes live in one arena and are addressed by [`NodeId`]. Every node keeps
//! a non-owning parent index and the ordered list of its children, so both
//! passes of the generator can walk up (scope lookup) and down (emission)
//! without reference cycles.

use super::symbol::SymbolId;
use super::token::Token;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Function declaration flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FunctionKind {
    Normal,
    Generator,
    Event,
    Operator,
}

impl FunctionKind {
    pub fn as_u8(self) -> u8 {
        match self {
            FunctionKind::Normal => 0,
            FunctionKind::Generator => 1,
            FunctionKind::Event => 2,
            FunctionKind::Operator => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FunctionKind::Normal),
            1 => Some(FunctionKind::Generator),
            2 => Some(FunctionKind::Event),
            3 => Some(FunctionKind::Operator),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            FunctionKind::Normal => "function",
            FunctionKind::Generator => "generator",
            FunctionKind::Event => "event",
            FunctionKind::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub token: Token,
}

/// What a function declaration is bound to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FunctionBody {
    /// A script body (a `Block` node)
    Block(NodeId),
    /// `= native("name")`
    Native(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
        }
    }

    pub fn from_symbol(text: &str) -> Option<Self> {
        use BinaryOp::*;
        [
            Add, Sub, Mul, Div, Mod, BitAnd, BitOr, BitXor, Shl, Shr, Equal, NotEqual, Less,
            LessEqual, Greater, GreaterEqual,
        ]
        .into_iter()
        .find(|op| op.symbol() == text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Type names accepted by `is` and `as`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeName {
    Null,
    Int,
    Float,
    String,
    List,
    Dict,
    Function,
    Iterator,
    Object,
}

impl TypeName {
    pub const ALL: [TypeName; 9] = [
        TypeName::Null,
        TypeName::Int,
        TypeName::Float,
        TypeName::String,
        TypeName::List,
        TypeName::Dict,
        TypeName::Function,
        TypeName::Iterator,
        TypeName::Object,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypeName::Null => "null",
            TypeName::Int => "int",
            TypeName::Float => "float",
            TypeName::String => "string",
            TypeName::List => "list",
            TypeName::Dict => "dict",
            TypeName::Function => "function",
            TypeName::Iterator => "iterator",
            TypeName::Object => "object",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn code(self) -> i64 {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0) as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Targets of `as`
    pub fn is_castable(self) -> bool {
        matches!(self, TypeName::Int | TypeName::Float | TypeName::String)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    // ===== statements =====
    /// Implicit global scope
    Program,
    Block,
    Var {
        name: String,
        constant: bool,
        init: Option<NodeId>,
    },
    Function {
        name: String,
        kind: FunctionKind,
        params: Vec<Param>,
        body: FunctionBody,
    },
    Class {
        name: String,
        base: Option<String>,
    },
    /// Children are the event functions
    State {
        name: String,
        default: bool,
    },
    For {
        init: Option<NodeId>,
        condition: Option<NodeId>,
        step: Option<NodeId>,
        body: NodeId,
    },
    Foreach {
        variable: String,
        declare: bool,
        iterable: NodeId,
        body: NodeId,
    },
    While {
        condition: NodeId,
        body: NodeId,
    },
    /// `condition == None` is `do ... forever`
    Do {
        body: NodeId,
        condition: Option<NodeId>,
    },
    If {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    Switch {
        subject: NodeId,
        cases: Vec<NodeId>,
        default: Option<NodeId>,
    },
    /// Children are the case body statements
    Case {
        values: Vec<NodeId>,
    },
    Default,
    Break {
        levels: u32,
        target: NodeId,
    },
    Continue {
        levels: u32,
        target: NodeId,
    },
    Return {
        value: Option<NodeId>,
    },
    Yield {
        value: NodeId,
    },
    GotoState {
        name: String,
    },
    Using {
        name: String,
    },
    /// Expression statement
    Expression {
        expr: NodeId,
    },

    // ===== expressions =====
    Literal(Literal),
    Identifier {
        name: String,
    },
    List {
        elements: Vec<NodeId>,
    },
    Dict {
        entries: Vec<(NodeId, NodeId)>,
    },
    /// `native("name")`
    Intrinsic {
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Logical {
        op: LogicalOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// `op == None` is plain `=`
    Assign {
        op: Option<BinaryOp>,
        target: NodeId,
        value: NodeId,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        target: NodeId,
    },
    Ternary {
        condition: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    },
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    Index {
        target: NodeId,
        index: NodeId,
    },
    Member {
        target: NodeId,
        name: String,
    },
    /// `expr { "k": v, ... }`
    Initializer {
        target: NodeId,
        entries: Vec<(NodeId, NodeId)>,
    },
    TypeCheck {
        operand: NodeId,
        ty: TypeName,
    },
    Cast {
        operand: NodeId,
        ty: TypeName,
    },
}

impl NodeKind {
    /// Nodes whose symbols form a lookup scope
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::Program
                | NodeKind::Block
                | NodeKind::Function { .. }
                | NodeKind::State { .. }
                | NodeKind::For { .. }
                | NodeKind::Foreach { .. }
                | NodeKind::Case { .. }
                | NodeKind::Default
        )
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            NodeKind::For { .. }
                | NodeKind::Foreach { .. }
                | NodeKind::While { .. }
                | NodeKind::Do { .. }
        )
    }

    /// Short name used in dumps and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program => "Program",
            NodeKind::Block => "Block",
            NodeKind::Var { .. } => "Var",
            NodeKind::Function { .. } => "Function",
            NodeKind::Class { .. } => "Class",
            NodeKind::State { .. } => "State",
            NodeKind::For { .. } => "For",
            NodeKind::Foreach { .. } => "Foreach",
            NodeKind::While { .. } => "While",
            NodeKind::Do { .. } => "Do",
            NodeKind::If { .. } => "If",
            NodeKind::Switch { .. } => "Switch",
            NodeKind::Case { .. } => "Case",
            NodeKind::Default => "Default",
            NodeKind::Break { .. } => "Break",
            NodeKind::Continue { .. } => "Continue",
            NodeKind::Return { .. } => "Return",
            NodeKind::Yield { .. } => "Yield",
            NodeKind::GotoState { .. } => "GotoState",
            NodeKind::Using { .. } => "Using",
            NodeKind::Expression { .. } => "Expression",
            NodeKind::Literal(_) => "Literal",
            NodeKind::Identifier { .. } => "Identifier",
            NodeKind::List { .. } => "List",
            NodeKind::Dict { .. } => "Dict",
            NodeKind::Intrinsic { .. } => "Intrinsic",
            NodeKind::Unary { .. } => "Unary",
            NodeKind::Binary { .. } => "Binary",
            NodeKind::Logical { .. } => "Logical",
            NodeKind::Assign { .. } => "Assign",
            NodeKind::IncDec { .. } => "IncDec",
            NodeKind::Ternary { .. } => "Ternary",
            NodeKind::Call { .. } => "Call",
            NodeKind::Index { .. } => "Index",
            NodeKind::Member { .. } => "Member",
            NodeKind::Initializer { .. } => "Initializer",
            NodeKind::TypeCheck { .. } => "TypeCheck",
            NodeKind::Cast { .. } => "Cast",
        }
    }
}

/// Jump targets a node owns, created by the symbol pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Labels {
    pub break_label: Option<SymbolId>,
    pub continue_label: Option<SymbolId>,
    /// Construct-specific targets (else/end, case bodies, ...)
    pub extra: Vec<SymbolId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Token,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// For scope nodes: the value symbols declared directly in the scope
    pub symbols: Vec<SymbolId>,
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and adopts `children` (sets their parent, in order)
    pub fn add(&mut self, kind: NodeKind, token: Token, children: &[NodeId]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            token,
            parent: None,
            children: Vec::new(),
            symbols: Vec::new(),
            labels: Labels::default(),
        });
        for &child in children {
            self.adopt(id, child);
        }
        id
    }

    /// Appends `child` to `parent`'s children and points it back at `parent`
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn token(&self, id: NodeId) -> &Token {
        &self.nodes[id.index()].token
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// The root is always the first node
    pub fn root(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(NodeId(0))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `id` itself, then its ancestors up to the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.parent(n))
    }

    /// Nearest enclosing function declaration, including `id` itself
    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .find(|&n| matches!(self.kind(n), NodeKind::Function { .. }))
    }

    /// Indented one-line-per-node dump, used by tests and `--dump-ast`
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root() {
            self.dump_node(root, 0, &mut out);
        }
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let detail = match &node.kind {
            NodeKind::Var { name, .. }
            | NodeKind::Function { name, .. }
            | NodeKind::Class { name, .. }
            | NodeKind::State { name, .. }
            | NodeKind::Identifier { name }
            | NodeKind::Member { name, .. }
            | NodeKind::GotoState { name }
            | NodeKind::Using { name }
            | NodeKind::Intrinsic { name } => format!(" {name}"),
            NodeKind::Literal(literal) => format!(" {literal:?}"),
            NodeKind::Binary { op, .. } => format!(" {}", op.symbol()),
            NodeKind::Unary { op, .. } => format!(" {op:?}"),
            NodeKind::Logical { op, .. } => format!(" {op:?}"),
            NodeKind::Assign { op: Some(op), .. } => format!(" {}=", op.symbol()),
            _ => String::new(),
        };
        out.push_str(&format!("{}{}{}\n", "  ".repeat(depth), node.kind.name(), detail));
        for &child in &node.children {
            self.dump_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::token::TokenKind;

    fn tok() -> Token {
        Token::new(TokenKind::Identifier, "x", 1, 1)
    }

    #[test]
    fn test_add_sets_parents() {
        let mut ast = Ast::new();
        let root = ast.add(NodeKind::Program, tok(), &[]);
        let lhs = ast.add(NodeKind::Literal(Literal::Int(1)), tok(), &[]);
        let rhs = ast.add(NodeKind::Literal(Literal::Int(2)), tok(), &[]);
        let sum = ast.add(
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            },
            tok(),
            &[lhs, rhs],
        );
        ast.adopt(root, sum);

        assert_eq!(ast.parent(lhs), Some(sum));
        assert_eq!(ast.parent(sum), Some(root));
        assert_eq!(ast.children(sum), &[lhs, rhs]);
        assert_eq!(ast.ancestors(lhs).collect::<Vec<_>>(), vec![lhs, sum, root]);
        assert_eq!(ast.dump(), "Program\n  Binary +\n    Literal Int(1)\n    Literal Int(2)\n");
    }

    #[test]
    fn test_type_codes_round_trip() {
        for ty in TypeName::ALL {
            assert_eq!(TypeName::from_code(ty.code()), Some(ty));
        }
        assert_eq!(TypeName::from_name("INT"), Some(TypeName::Int));
        assert!(!TypeName::List.is_castable());
    }

    #[test]
    fn test_binary_op_symbols() {
        assert_eq!(BinaryOp::from_symbol("<<"), Some(BinaryOp::Shl));
        assert_eq!(BinaryOp::from_symbol("&&"), None);
    }
}
